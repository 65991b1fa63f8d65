//! CLI definitions using clap.
//!
//! Run modes (at most one):
//! - default: one scan/schedule/supervise cycle
//! - --watch: cycle until interrupted
//! - --cycles N: a fixed number of cycles
//! - --status: print pending work without scheduling
//! - --check: report consistency violations
//! - --reset STAGE: make a stage and its dependents pending again

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use stagehand::daemon::RunMode;

/// Stagehand - keeps a multi-stage processing pipeline converging
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").args(["status", "watch", "cycles", "check", "reset"])))]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the gap report and live workers, then exit
    #[arg(long)]
    pub status: bool,

    /// Run the control loop until interrupted
    #[arg(short, long)]
    pub watch: bool,

    /// Run this many cycles, then exit
    #[arg(long, value_name = "N")]
    pub cycles: Option<u64>,

    /// Check store consistency; exits nonzero on violations
    #[arg(long)]
    pub check: bool,

    /// Delete a stage's outputs (and its dependents') so they are recomputed
    #[arg(long, value_name = "STAGE")]
    pub reset: Option<String>,

    /// Seconds between cycles (overrides config)
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Datastore path (overrides config)
    #[arg(short, long, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

/// What this invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Status,
    Check,
    Reset(String),
    Run(RunMode),
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn mode(&self) -> Mode {
        if self.status {
            Mode::Status
        } else if self.check {
            Mode::Check
        } else if let Some(stage) = &self.reset {
            Mode::Reset(stage.clone())
        } else if self.watch {
            Mode::Run(RunMode::Watch)
        } else if let Some(n) = self.cycles {
            Mode::Run(RunMode::Cycles(n))
        } else {
            Mode::Run(RunMode::OneShot)
        }
    }
}
