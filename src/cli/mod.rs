//! CLI module for stagehand - command-line interface and run modes.
//!
//! The orchestrator has no subcommands; one flag picks what a run does.

pub mod commands;

pub use commands::{Cli, Mode};
