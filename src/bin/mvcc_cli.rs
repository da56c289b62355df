//! Simple CLI for poking at an MVCC storage database.
//!
//! Usage:
//!   mvcc_cli <db_path> create
//!   mvcc_cli <db_path> insert <data>
//!   mvcc_cli <db_path> read <uid>
//!   mvcc_cli <db_path> delete <uid>
//!   mvcc_cli <db_path> stats
//!
//! `<db_path>` is the base path; the database files are `<db_path>.db`,
//! `<db_path>.log` and `<db_path>.xid`. Every command runs in its own
//! read-committed transaction. Set `RUST_LOG` for engine logs.

use mvcc_storage::{Config, Db, IsolationLevel, Result, Uid, Xid};
use std::env;
use std::process::exit;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

fn usage() -> ! {
    eprintln!("Usage: mvcc_cli <db_path> <command> [args...]");
    eprintln!("Commands:");
    eprintln!("  create         - Create a new, empty database");
    eprintln!("  insert <data>  - Insert a record and print its uid");
    eprintln!("  read <uid>     - Print a record");
    eprintln!("  delete <uid>   - Delete a record");
    eprintln!("  stats          - Show database statistics as JSON");
    exit(1);
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {}", e);
    exit(1);
}

fn parse_uid(arg: Option<&String>) -> Uid {
    match arg.map(|s| s.parse::<Uid>()) {
        Some(Ok(uid)) => uid,
        Some(Err(e)) => fail(e),
        None => usage(),
    }
}

/// Run `f` inside one transaction, committing on success
fn in_transaction<T>(db: &Db, f: impl FnOnce(Xid) -> Result<T>) -> Result<T> {
    let xid = db.begin(IsolationLevel::ReadCommitted)?;
    match f(xid) {
        Ok(value) => {
            db.commit(xid)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = db.abort(xid) {
                warn!(xid, error = %abort_err, "cli.abort_failed");
            }
            Err(e)
        }
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }

    let config = Config::new(&args[1]);
    let command = args[2].as_str();

    if command == "create" {
        match Db::create(config).and_then(Db::close) {
            Ok(()) => println!("CREATED"),
            Err(e) => fail(e),
        }
        return;
    }

    let db = match Db::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            exit(1);
        }
    };

    let result = match command {
        "insert" => {
            let Some(data) = args.get(3) else { usage() };
            in_transaction(&db, |xid| db.insert(xid, data.as_bytes()))
                .map(|uid| println!("{}", uid))
        }

        "read" => {
            let uid = parse_uid(args.get(3));
            in_transaction(&db, |xid| db.read(xid, uid)).map(|found| match found {
                Some(value) => match String::from_utf8(value) {
                    Ok(s) => println!("{}", s),
                    Err(_) => println!("<binary data>"),
                },
                None => println!("NOT_FOUND"),
            })
        }

        "delete" => {
            let uid = parse_uid(args.get(3));
            in_transaction(&db, |xid| db.delete(xid, uid)).map(|deleted| {
                if deleted {
                    println!("DELETED");
                } else {
                    println!("NOT_FOUND");
                }
            })
        }

        "stats" => match serde_json::to_string_pretty(&db.stats()) {
            Ok(json) => {
                println!("{}", json);
                Ok(())
            }
            Err(e) => fail(e),
        },

        _ => {
            eprintln!("Unknown command: {}", command);
            exit(1);
        }
    };

    if let Err(e) = result {
        fail(e);
    }

    // Mark the shutdown clean so the next run skips recovery
    if let Err(e) = db.close() {
        fail(e);
    }
}
