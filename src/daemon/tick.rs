//! Control loop configuration and per-cycle bookkeeping.

use std::time::Duration;

use serde::Serialize;

use crate::scanner::GapReport;
use crate::scheduler::{ReapedWorker, StartDecision};

/// How long the control loop keeps cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly one scan/schedule/supervise cycle.
    OneShot,
    /// A fixed number of cycles.
    Cycles(u64),
    /// Until interrupted.
    Watch,
}

impl RunMode {
    /// Whether another cycle should start after `completed` cycles.
    pub fn wants_cycle(&self, completed: u64) -> bool {
        match self {
            RunMode::OneShot => completed < 1,
            RunMode::Cycles(n) => completed < *n,
            RunMode::Watch => true,
        }
    }
}

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Sleep between cycles
    pub interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl ControlConfig {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// 1-based cycle number within this run
    pub cycle: u64,
    pub gaps: GapReport,
    pub launched: Vec<StartDecision>,
    #[serde(skip)]
    pub reaped: Vec<ReapedWorker>,
    /// Labels of workers killed as hung
    pub killed: Vec<String>,
    /// Stages disabled this cycle because their fix-action would not start
    pub disabled: Vec<String>,
    pub export_fired: bool,
    /// Live workers after launching
    pub live_workers: usize,
}

impl CycleReport {
    pub fn failed_exits(&self) -> usize {
        self.reaped.iter().filter(|r| !r.success).count()
    }

    /// Whether the cycle changed anything in the run state.
    pub fn is_quiet(&self) -> bool {
        self.launched.is_empty() && self.reaped.is_empty() && self.killed.is_empty() && self.disabled.is_empty()
    }
}

/// Running totals across cycles
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickState {
    /// Number of cycles since start
    pub cycles: u64,
    /// Workers launched this session
    pub total_launched: u64,
    /// Workers that exited
    pub total_reaped: u64,
    /// Workers that exited with failure
    pub total_failed: u64,
    /// Workers killed as hung
    pub total_killed: u64,
    /// Export invocations
    pub exports: u64,
    /// Whether shutdown has been requested
    pub shutdown_requested: bool,
}

impl TickState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one cycle into the totals.
    pub fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.total_launched += report.launched.iter().map(|d| d.shard_count as u64).sum::<u64>();
        self.total_reaped += report.reaped.len() as u64;
        self.total_failed += report.failed_exits() as u64;
        self.total_killed += report.killed.len() as u64;
        if report.export_fired {
            self.exports += 1;
        }
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }
}
