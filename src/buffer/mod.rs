//! Buffer layer: reference-counted caching of pages.
//!
//! Pages are never evicted silently; a page leaves memory only once every
//! holder has released it, and a dirty page is written back at that point.

mod page_cache;
pub mod refcount;

pub use page_cache::{PageCache, MIN_CACHE_PAGES};
pub use refcount::{CacheSource, RefCountCache};
