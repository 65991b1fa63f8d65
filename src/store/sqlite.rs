//! SQLite-backed store shared by the orchestrator and all workers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StagehandError};
use crate::id::{item_id_for, now_ms};
use crate::registry::is_identifier;
use crate::store::records::{BASE_SCHEMA, OutputRow, OutputStatus, output_table_ddl};

/// Connection settings for the datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// How long SQLite itself waits for a lock before returning SQLITE_BUSY.
    pub busy_timeout_ms: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { busy_timeout_ms: 250 }
    }
}

/// Handle to the shared datastore.
pub struct Store {
    /// Database file (`:memory:` for in-memory stores)
    path: PathBuf,
    db: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open (or create) the datastore file.
    ///
    /// Does not create any tables; readers must cope with a store that no worker
    /// has written to yet.
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let db = Connection::open(path)?;
        Self::configure(&db, options)?;

        Ok(Self {
            path: path.to_path_buf(),
            db,
        })
    }

    /// Open an existing datastore without writing to it.
    ///
    /// Nothing is created: a missing file is an error, and the journal mode is
    /// left as the writers set it.
    pub fn open_read_only(path: &Path, options: &StoreOptions) -> Result<Self> {
        if !path.is_file() {
            return Err(StagehandError::Store(format!("no store at {}", path.display())));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let db = Connection::open_with_flags(path, flags)?;
        db.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
        log::debug!("Opened {} read-only", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            db,
        })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::configure(&db, &StoreOptions::default())?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            db,
        })
    }

    fn configure(db: &Connection, options: &StoreOptions) -> Result<()> {
        db.busy_timeout(Duration::from_millis(options.busy_timeout_ms))?;
        let mode: String = db.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        db.execute_batch("PRAGMA synchronous = NORMAL;")?;
        log::debug!("Store journal_mode={}, busy_timeout={}ms", mode, options.busy_timeout_ms);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.db
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.db
    }

    /// Create the catalog and bookkeeping tables if missing.
    pub fn ensure_schema(&self) -> Result<()> {
        self.db.execute_batch(BASE_SCHEMA)?;
        Ok(())
    }

    /// Create a stage output table if missing.
    pub fn ensure_output_table(&self, table: &str) -> Result<()> {
        if !is_identifier(table) {
            return Err(StagehandError::Store(format!("invalid table name: {:?}", table)));
        }
        self.db.execute_batch(&output_table_ddl(table))?;
        Ok(())
    }

    /// Check whether a table (or view) exists.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .db
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Register catalog items, deriving deterministic IDs from their sources.
    ///
    /// Returns the number of items that were not already present.
    pub fn insert_items<S: AsRef<str>>(&mut self, sources: &[S]) -> Result<usize> {
        self.ensure_schema()?;
        let now = now_ms();
        let tx = self.db.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO items (id, source, created_at) VALUES (?1, ?2, ?3)")?;
            for source in sources {
                let source = source.as_ref();
                inserted += stmt.execute(params![item_id_for(source), source, now])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Register one item under an explicit ID.
    pub fn insert_item_with_id(&self, id: &str, source: &str) -> Result<()> {
        self.ensure_schema()?;
        self.db.execute(
            "INSERT OR IGNORE INTO items (id, source, created_at) VALUES (?1, ?2, ?3)",
            params![id, source, now_ms()],
        )?;
        Ok(())
    }

    /// Number of catalog items (0 when the catalog does not exist yet).
    pub fn item_count(&self) -> Result<usize> {
        if !self.table_exists("items")? {
            return Ok(0);
        }
        let count: i64 = self.db.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Fetch one output row.
    pub fn output_row(&self, table: &str, item_id: &str) -> Result<Option<OutputRow>> {
        if !is_identifier(table) || !self.table_exists(table)? {
            return Ok(None);
        }
        let sql = format!("SELECT item_id, status, payload, error, updated_at FROM {table} WHERE item_id = ?1");
        let raw = self
            .db
            .query_row(&sql, [item_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .optional()?;

        let Some((item_id, status, payload, error, updated_at)) = raw else {
            return Ok(None);
        };
        let status = OutputStatus::parse(&status)
            .ok_or_else(|| StagehandError::Store(format!("unknown status {:?} in {}", status, table)))?;
        let payload = payload.map(|p| serde_json::from_str(&p)).transpose()?;

        Ok(Some(OutputRow {
            item_id,
            status,
            payload,
            error,
            updated_at,
        }))
    }

    /// Transient attempts recorded for an item in a stage.
    pub fn attempts(&self, stage: &str, item_id: &str) -> Result<u32> {
        if !self.table_exists("stage_attempts")? {
            return Ok(0);
        }
        let attempts: Option<i64> = self
            .db
            .query_row(
                "SELECT attempts FROM stage_attempts WHERE stage = ?1 AND item_id = ?2",
                [stage, item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempts.unwrap_or(0) as u32)
    }

    /// Explicit reprocessing: drop output and attempt counters for the given
    /// stages in one transaction. Returns the number of output rows removed.
    ///
    /// Each target is `(stage name, output table)`; stages without a table only
    /// have their attempt counters cleared.
    pub fn reset_stages(&mut self, targets: &[(&str, Option<&str>)]) -> Result<usize> {
        let mut existing = Vec::new();
        for (stage, table) in targets {
            let table = match table {
                Some(t) if self.table_exists(t)? => Some(*t),
                _ => None,
            };
            existing.push((*stage, table));
        }
        let has_attempts = self.table_exists("stage_attempts")?;

        let tx = self.db.transaction()?;
        let mut removed = 0;
        for (stage, table) in existing {
            if let Some(table) = table {
                removed += tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            if has_attempts {
                tx.execute("DELETE FROM stage_attempts WHERE stage = ?1", [stage])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}
