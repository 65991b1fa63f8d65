//! Gap report types.

use serde::Serialize;

/// Completion state of one stage as of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageGap {
    pub stage: String,
    /// Items whose dependencies are all satisfied.
    pub eligible_total: usize,
    /// Eligible items already complete (`ok` or `empty`).
    pub complete_count: usize,
    /// Eligible items permanently failed.
    pub failed_count: usize,
    /// Eligible items still needing work, sorted.
    pub pending_ids: Vec<String>,
}

impl StageGap {
    pub fn empty(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            eligible_total: 0,
            complete_count: 0,
            failed_count: 0,
            pending_ids: Vec::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_ids.len()
    }

    /// Whether nothing remains to schedule for this stage.
    pub fn is_done(&self) -> bool {
        self.pending_ids.is_empty()
    }

    /// Completion percentage over eligible items.
    pub fn percent_complete(&self) -> f64 {
        if self.eligible_total == 0 {
            return 0.0;
        }
        self.complete_count as f64 * 100.0 / self.eligible_total as f64
    }
}

/// Per-stage pending work derived from the store. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapReport {
    /// Catalog size at scan time.
    pub item_total: usize,
    /// One entry per stage in topological order.
    pub stages: Vec<StageGap>,
}

impl GapReport {
    pub fn get(&self, stage: &str) -> Option<&StageGap> {
        self.stages.iter().find(|g| g.stage == stage)
    }

    pub fn total_pending(&self) -> usize {
        self.stages.iter().map(StageGap::pending_count).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|g| g.failed_count).sum()
    }

    /// Zero pending items across all stages.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(StageGap::is_done)
    }
}
