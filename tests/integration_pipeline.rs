//! Pipeline convergence integration tests
//!
//! Drives the scanner and writer against a file-backed store the way workers
//! and the orchestrator share it.

use stagehand::error::Result;
use stagehand::id::item_id_for;
use stagehand::registry::{FixAction, ResourceClass, Stage, StageDefaults, StageRegistry};
use stagehand::scanner::{CompletionScanner, Violation};
use stagehand::store::{Store, StoreOptions};
use stagehand::writer::{BatchWriter, Outcome, WriterConfig};
use tempfile::TempDir;

fn two_stage_registry() -> StageRegistry {
    StageRegistry::new(
        vec![
            Stage::new("a", ResourceClass::CpuParallel, FixAction::new("a-worker")),
            Stage::new("b", ResourceClass::CpuParallel, FixAction::new("b-worker")).depends_on("a"),
        ],
        &StageDefaults::default(),
    )
    .unwrap()
}

fn catalog(store: &mut Store, count: usize) -> Result<Vec<String>> {
    let sources: Vec<String> = (0..count).map(|i| format!("/library/{:04}.jpg", i)).collect();
    store.insert_items(&sources)?;
    let mut ids: Vec<String> = sources.iter().map(|s| item_id_for(s)).collect();
    ids.sort();
    Ok(ids)
}

fn complete(store: &mut Store, registry: &StageRegistry, stage: &str, ids: &[String]) -> Result<()> {
    let mut writer = BatchWriter::new(store, registry.stage(stage)?, WriterConfig::default())?;
    for id in ids {
        writer.record(id.clone(), Outcome::Empty)?;
    }
    writer.finish()?;
    Ok(())
}

/// 100 items, A 40% complete, B depends on A at 0%.
#[test]
fn test_downstream_waits_for_upstream() -> Result<()> {
    let temp = TempDir::new()?;
    let registry = two_stage_registry();
    let mut store = Store::open(&temp.path().join("pipeline.db"), &StoreOptions::default())?;
    let ids = catalog(&mut store, 100)?;

    complete(&mut store, &registry, "a", &ids[..40])?;
    let report = CompletionScanner::new(&registry).scan(&store)?;
    assert_eq!(report.item_total, 100);
    assert_eq!(report.get("a").unwrap().pending_count(), 60);
    assert_eq!(report.get("b").unwrap().pending_count(), 0);

    complete(&mut store, &registry, "a", &ids[40..])?;
    let report = CompletionScanner::new(&registry).scan(&store)?;
    assert_eq!(report.get("a").unwrap().pending_count(), 0);
    assert_eq!(report.get("b").unwrap().pending_count(), 100);
    Ok(())
}

/// A worker flushes 10 results and is killed before flushing 7 more.
#[test]
fn test_killed_worker_loses_only_unflushed_items() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("pipeline.db");
    let registry = two_stage_registry();
    let ids = {
        let mut store = Store::open(&path, &StoreOptions::default())?;
        catalog(&mut store, 17)?
    };

    {
        let mut store = Store::open(&path, &StoreOptions::default())?;
        let config = WriterConfig {
            flush_threshold: 10,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(&mut store, registry.stage("a")?, config)?;
        for id in &ids {
            writer.record(id.clone(), Outcome::Empty)?;
        }
        assert_eq!(writer.stats().flushes, 1);
        assert_eq!(writer.buffered(), 7);
        // dropped without finish: the process died here
    }

    let store = Store::open(&path, &StoreOptions::default())?;
    let gap = CompletionScanner::new(&registry).scan_stage(&store, "a")?;
    assert_eq!(gap.pending_count(), 7);
    assert_eq!(gap.complete_count, 10);
    let flushed: Vec<&String> = ids.iter().filter(|id| !gap.pending_ids.contains(id)).collect();
    assert_eq!(flushed.len(), 10);
    Ok(())
}

#[test]
fn test_scans_are_idempotent() -> Result<()> {
    let temp = TempDir::new()?;
    let registry = two_stage_registry();
    let mut store = Store::open(&temp.path().join("pipeline.db"), &StoreOptions::default())?;
    let ids = catalog(&mut store, 25)?;
    complete(&mut store, &registry, "a", &ids[..9])?;

    let scanner = CompletionScanner::new(&registry);
    assert_eq!(scanner.scan(&store)?, scanner.scan(&store)?);
    Ok(())
}

#[test]
fn test_consistency_flags_missing_dependency() -> Result<()> {
    let temp = TempDir::new()?;
    let registry = two_stage_registry();
    let mut store = Store::open(&temp.path().join("pipeline.db"), &StoreOptions::default())?;
    let ids = catalog(&mut store, 3)?;

    complete(&mut store, &registry, "a", &ids[..2])?;
    complete(&mut store, &registry, "b", &ids[2..])?;

    let violations = CompletionScanner::new(&registry).check_consistency(&store)?;
    assert_eq!(
        violations,
        vec![Violation::MissingDependency {
            stage: "b".to_string(),
            dependency: "a".to_string(),
            item_id: ids[2].clone(),
        }]
    );
    Ok(())
}

#[test]
fn test_failed_sentinel_is_never_rescanned() -> Result<()> {
    let temp = TempDir::new()?;
    let registry = two_stage_registry();
    let mut store = Store::open(&temp.path().join("pipeline.db"), &StoreOptions::default())?;
    let ids = catalog(&mut store, 2)?;

    let mut writer = BatchWriter::new(&mut store, registry.stage("a")?, WriterConfig::default())?;
    writer.record(ids[0].clone(), Outcome::Failed("truncated file".to_string()))?;
    writer.record(ids[1].clone(), Outcome::Empty)?;
    writer.finish()?;

    let report = CompletionScanner::new(&registry).scan(&store)?;
    let a = report.get("a").unwrap();
    assert_eq!(a.pending_count(), 0);
    assert_eq!(a.failed_count, 1);
    // only items complete for a are eligible downstream
    assert_eq!(report.get("b").unwrap().eligible_total, 1);
    Ok(())
}
