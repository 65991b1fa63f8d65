//! Bounded retry on SQLite lock contention.
//!
//! SQLite's own busy timeout absorbs short waits. When it expires the
//! operation is retried here with exponential backoff: the delay starts at
//! `initial_backoff_ms` and doubles up to `max_backoff_ms`, for at most
//! `max_attempts` attempts. Errors other than lock contention are returned
//! immediately.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StagehandError};

/// Backoff policy for contended writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let ms = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

/// Run `operation` until it succeeds, fails with a non-lock error, or the
/// policy's attempts are used up (surfaced as `LockExhausted`).
pub fn retry_on_lock<T, F>(operation_name: &str, policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Store write succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_lock_contention() => return Err(err),
            Err(err) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Store still locked, giving up"
                    );
                    return Err(StagehandError::LockExhausted {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }

                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Store locked, backing off"
                );
                std::thread::sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> StagehandError {
        StagehandError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ))
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(4), Duration::from_millis(80));
        assert_eq!(policy.backoff(10), Duration::from_millis(1000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1000));
    }

    #[test]
    fn test_succeeds_after_contention() {
        let mut calls = 0;
        let result = retry_on_lock("flush", &fast(), || {
            calls += 1;
            if calls < 3 { Err(busy()) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_exhausts_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_on_lock("flush", &fast(), || {
            calls += 1;
            Err(busy())
        });
        assert_eq!(calls, 4);
        assert!(matches!(result, Err(StagehandError::LockExhausted { attempts: 4, .. })));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = retry_on_lock("flush", &fast(), || {
            calls += 1;
            Err(StagehandError::Store("disk full".to_string()))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(StagehandError::Store(_))));
    }
}
