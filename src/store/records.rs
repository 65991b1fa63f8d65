//! Row types and schema for the shared datastore.
//!
//! Every stage output table shares one layout, keyed by `item_id`. The `status`
//! column is what the completion scanner reads; `payload` is opaque to the
//! orchestrator and belongs to downstream consumers.

use serde::{Deserialize, Serialize};

/// Catalog and bookkeeping tables created by `Store::ensure_schema`.
pub const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS stage_attempts (
    stage TEXT NOT NULL,
    item_id TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (stage, item_id)
);
"#;

/// DDL for one stage output table.
pub fn output_table_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            item_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            payload TEXT,
            error TEXT,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(status);
        "#
    )
}

/// Persisted status of an item in a stage output table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    /// Output produced
    Ok,
    /// Valid "no signal" sentinel
    Empty,
    /// Permanent failure sentinel, never rescanned
    Failed,
}

impl OutputStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStatus::Ok => "ok",
            OutputStatus::Empty => "empty",
            OutputStatus::Failed => "failed",
        }
    }

    /// Check if this status satisfies the completion predicate.
    pub fn is_complete(&self) -> bool {
        matches!(self, OutputStatus::Ok | OutputStatus::Empty)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(OutputStatus::Ok),
            "empty" => Some(OutputStatus::Empty),
            "failed" => Some(OutputStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of a stage output table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub item_id: String,
    pub status: OutputStatus,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Unix timestamp in milliseconds
    pub updated_at: i64,
}
