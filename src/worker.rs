//! Helpers for fix-action processes.
//!
//! A worker is started with `--shard <i> --shard-count <W>` and nothing else
//! about its workload; it rescans the store and keeps the IDs it owns. Items
//! finished by another process in the meantime are naturally skipped.

use crate::error::Result;
use crate::pool::ShardSpec;
use crate::registry::StageRegistry;
use crate::scanner::CompletionScanner;
use crate::store::Store;

/// Pending item IDs of `stage` owned by `shard`, in ID order.
pub fn pending_for_shard(registry: &StageRegistry, store: &Store, stage: &str, shard: ShardSpec) -> Result<Vec<String>> {
    let gap = CompletionScanner::new(registry).scan_stage(store, stage)?;
    let mine = shard.select(&gap.pending_ids);
    log::info!(
        "Stage {} shard {}: {} of {} pending items",
        stage,
        shard,
        mine.len(),
        gap.pending_count()
    );
    Ok(mine)
}
