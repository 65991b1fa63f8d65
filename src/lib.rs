//! Stagehand - pipeline completion orchestrator and sharded worker coordinator
//!
//! Stagehand keeps a multi-stage processing pipeline over a shared item catalog
//! converging. Every cycle it derives each stage's pending work from the store,
//! starts external workers under per-resource-class limits, and supervises them
//! until nothing is left to do. Pipeline state lives only in the store, so any
//! orchestrator or worker may be killed and restarted at any point.

pub mod config;
pub mod daemon;
pub mod error;
pub mod id;
pub mod pool;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod worker;
pub mod writer;

pub use error::{Result, StagehandError};
