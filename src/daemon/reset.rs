//! Explicit reprocessing.
//!
//! Completion only ever moves forward on its own. Resetting a stage deletes its
//! output rows and attempt counters, and those of every stage downstream of
//! it, in one transaction so the next scan sees all of them as pending.

use serde::Serialize;

use crate::error::Result;
use crate::registry::{CompletionPredicate, StageRegistry};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    /// The requested stage followed by its downstream stages
    pub stages: Vec<String>,
    pub rows_removed: usize,
    /// Query-predicate stages whose completion lives outside their own table
    pub untouched: Vec<String>,
}

pub fn reset_stage(registry: &StageRegistry, store: &mut Store, name: &str) -> Result<ResetSummary> {
    let root = registry.stage(name)?;
    let mut affected = vec![root];
    affected.extend(registry.downstream_of(name)?);

    let mut targets = Vec::with_capacity(affected.len());
    let mut untouched = Vec::new();
    for stage in &affected {
        if let CompletionPredicate::Query(_) = stage.predicate {
            log::warn!("Stage {} completes by query; its output is not reset", stage.name);
            untouched.push(stage.name.clone());
        }
        targets.push((stage.name.as_str(), stage.output_table()));
    }

    let rows_removed = store.reset_stages(&targets)?;
    log::info!(
        "Reset {} ({} stages, {} rows removed)",
        name,
        affected.len(),
        rows_removed
    );

    Ok(ResetSummary {
        stages: affected.iter().map(|s| s.name.clone()).collect(),
        rows_removed,
        untouched,
    })
}
