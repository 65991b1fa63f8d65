//! Error types for Stagehand
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Stagehand
#[derive(Debug, Error)]
pub enum StagehandError {
    /// Stage registry failed validation (fatal at startup)
    #[error("Registry error: {0}")]
    Registry(String),

    /// Stage dependency graph contains a cycle (fatal at startup)
    #[error("Dependency cycle through stage: {0}")]
    DependencyCycle(String),

    /// Stage name not present in the registry
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Datastore error outside of SQLite itself
    #[error("Store error: {0}")]
    Store(String),

    /// Flush retries exhausted while the store stayed locked
    #[error("Store locked after {attempts} attempts: {message}")]
    LockExhausted { attempts: u32, message: String },

    /// Fix-action could not be started
    #[error("Failed to spawn worker for stage {stage}: {message}")]
    Spawn { stage: String, message: String },

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StagehandError {
    /// Whether this error is SQLite reporting a held lock.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            StagehandError::Sqlite(err) => is_busy(err),
            _ => false,
        }
    }
}

/// Check a raw SQLite error for busy/locked codes.
pub fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// Result type alias for Stagehand operations
pub type Result<T> = std::result::Result<T, StagehandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error() {
        let err = StagehandError::Registry("duplicate stage: ocr".to_string());
        assert_eq!(err.to_string(), "Registry error: duplicate stage: ocr");
    }

    #[test]
    fn test_cycle_error() {
        let err = StagehandError::DependencyCycle("faces".to_string());
        assert_eq!(err.to_string(), "Dependency cycle through stage: faces");
    }

    #[test]
    fn test_lock_exhausted_error() {
        let err = StagehandError::LockExhausted {
            attempts: 5,
            message: "database is locked".to_string(),
        };
        assert_eq!(err.to_string(), "Store locked after 5 attempts: database is locked");
    }

    #[test]
    fn test_spawn_error() {
        let err = StagehandError::Spawn {
            stage: "render".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert!(err.to_string().contains("render"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StagehandError = io_err.into();
        assert!(matches!(err, StagehandError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_busy_detection() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(is_busy(&busy));
        assert!(StagehandError::Sqlite(busy).is_lock_contention());
        assert!(!StagehandError::Store("x".to_string()).is_lock_contention());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_err() -> Result<i32> {
            Err(StagehandError::UnknownStage("nope".to_string()))
        }
        assert!(returns_err().is_err());
    }
}
