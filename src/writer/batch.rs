//! Buffered, transactional result writer used inside workers.

use rusqlite::{TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StagehandError};
use crate::id::now_ms;
use crate::registry::Stage;
use crate::store::{OutputStatus, Store};
use crate::writer::retry::{RetryPolicy, retry_on_lock};

/// Writer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WriterConfig {
    /// Buffered records that trigger an automatic flush.
    pub flush_threshold: usize,
    #[serde(flatten)]
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 50,
            retry: RetryPolicy::default(),
        }
    }
}

/// What a worker concluded about one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Output produced.
    Found(Value),
    /// Processed successfully, nothing to record ("no signal found").
    Empty,
    /// Will never succeed (structurally bad input).
    Failed(String),
    /// Might succeed later; counts toward the stage's retry ceiling.
    Transient(String),
}

/// Counts of what a writer committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub flushes: usize,
    pub ok: usize,
    pub empty: usize,
    pub failed: usize,
    pub transient: usize,
    /// Transient outcomes that hit the retry ceiling and became `failed`.
    pub gave_up: usize,
}

impl WriteStats {
    pub fn records(&self) -> usize {
        self.ok + self.empty + self.failed + self.transient
    }
}

/// Buffers outcomes for one stage and commits them in batches.
///
/// Dropping the writer without [`BatchWriter::finish`] discards the buffer,
/// which is the same as the worker being killed before its next flush.
pub struct BatchWriter<'a> {
    store: &'a mut Store,
    stage: String,
    table: String,
    max_retries: u32,
    config: WriterConfig,
    buffer: Vec<(String, Outcome)>,
    stats: WriteStats,
}

impl<'a> BatchWriter<'a> {
    /// Prepare a writer for a table-backed stage, creating its output table.
    pub fn new(store: &'a mut Store, stage: &Stage, config: WriterConfig) -> Result<Self> {
        let table = stage.output_table().ok_or_else(|| {
            StagehandError::Config(format!(
                "stage {} uses a query predicate and has no output table to write",
                stage.name
            ))
        })?;
        store.ensure_schema()?;
        store.ensure_output_table(table)?;

        Ok(Self {
            store,
            stage: stage.name.clone(),
            table: table.to_string(),
            max_retries: stage.max_retries(),
            config,
            buffer: Vec::new(),
            stats: WriteStats::default(),
        })
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Buffer an outcome, flushing when the threshold is reached.
    pub fn record(&mut self, item_id: impl Into<String>, outcome: Outcome) -> Result<()> {
        self.buffer.push((item_id.into(), outcome));
        if self.buffer.len() >= self.config.flush_threshold.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit the buffer in one transaction. On error the buffer is kept so
    /// the caller may try again.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let operation = format!("flush {}", self.stage);
        let batch = &self.buffer;
        let (stage, table, max_retries) = (&self.stage, &self.table, self.max_retries);
        let store = &mut *self.store;
        let delta = retry_on_lock(&operation, &self.config.retry, || {
            write_batch(store, stage, table, max_retries, batch)
        })?;

        let written = self.buffer.len();
        self.buffer.clear();
        self.stats.flushes += 1;
        self.stats.ok += delta.ok;
        self.stats.empty += delta.empty;
        self.stats.failed += delta.failed;
        self.stats.transient += delta.transient;
        self.stats.gave_up += delta.gave_up;

        tracing::debug!(stage = %self.stage, written, "Flushed batch");
        Ok(written)
    }

    /// Flush what is left and return the totals.
    pub fn finish(mut self) -> Result<WriteStats> {
        self.flush()?;
        Ok(self.stats)
    }
}

fn write_batch(
    store: &mut Store,
    stage: &str,
    table: &str,
    max_retries: u32,
    batch: &[(String, Outcome)],
) -> Result<WriteStats> {
    let now = now_ms();
    let mut delta = WriteStats::default();
    let tx = store
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    {
        let mut upsert = tx.prepare(&format!(
            "INSERT INTO {table} (item_id, status, payload, error, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(item_id) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                error = excluded.error,
                updated_at = excluded.updated_at"
        ))?;
        let mut bump = tx.prepare(
            "INSERT INTO stage_attempts (stage, item_id, attempts, last_error, updated_at) VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(stage, item_id) DO UPDATE SET
                attempts = attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
             RETURNING attempts",
        )?;
        let mut clear = tx.prepare("DELETE FROM stage_attempts WHERE stage = ?1 AND item_id = ?2")?;

        for (item_id, outcome) in batch {
            match outcome {
                Outcome::Found(payload) => {
                    let payload = serde_json::to_string(payload)?;
                    upsert.execute(params![item_id, OutputStatus::Ok.as_str(), payload, None::<String>, now])?;
                    clear.execute(params![stage, item_id])?;
                    delta.ok += 1;
                }
                Outcome::Empty => {
                    upsert.execute(params![item_id, OutputStatus::Empty.as_str(), None::<String>, None::<String>, now])?;
                    clear.execute(params![stage, item_id])?;
                    delta.empty += 1;
                }
                Outcome::Failed(reason) => {
                    upsert.execute(params![item_id, OutputStatus::Failed.as_str(), None::<String>, reason, now])?;
                    delta.failed += 1;
                }
                Outcome::Transient(reason) => {
                    let attempts: i64 = bump.query_row(params![stage, item_id, reason, now], |row| row.get(0))?;
                    delta.transient += 1;
                    if attempts >= i64::from(max_retries) {
                        let message = format!("gave up after {} attempts: {}", attempts, reason);
                        upsert.execute(params![item_id, OutputStatus::Failed.as_str(), None::<String>, message, now])?;
                        delta.gave_up += 1;
                        log::warn!("{}: item {} permanently failed after {} attempts", stage, item_id, attempts);
                    }
                }
            }
        }
    }
    tx.commit()?;
    Ok(delta)
}
