//! Shared datastore access.
//!
//! One SQLite file holds the item catalog, every stage output table and the
//! per-item attempt counters. The file is opened in WAL mode so completion
//! scans never wait on a worker's write transaction, and with a bounded busy
//! timeout so writers fail fast into their own retry loop instead of blocking.
//!
//! # Example
//!
//! ```ignore
//! use stagehand::store::{Store, StoreOptions};
//! use std::path::Path;
//!
//! let mut store = Store::open(Path::new("/srv/media/pipeline.db"), &StoreOptions::default())?;
//! store.insert_items(&["2019/IMG_0001.HEIC", "2019/IMG_0002.HEIC"])?;
//! ```

mod records;
mod sqlite;

pub use records::{BASE_SCHEMA, OutputRow, OutputStatus, output_table_ddl};
pub use sqlite::{Store, StoreOptions};
