//! Completion scanner.
//!
//! Computes, for every stage, which items are eligible (all dependencies
//! satisfied) and which of those still need work. A `barrier` stage has no
//! eligible items until every dependency stage has nothing pending; an `item`
//! stage becomes eligible item by item. Everything is derived from the
//! store on every call; nothing is cached between scans, so two scans with no
//! writes in between return identical reports.

mod gap;
mod query;

pub use gap::{GapReport, StageGap};
pub use query::{EMPTY_SET, PredicateSql, classify_sql, is_missing_table};

use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::registry::{DependencyGate, Stage, StageRegistry};
use crate::store::Store;

/// A store state no valid run can produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Item complete for `stage` while `dependency` is not complete.
    MissingDependency {
        stage: String,
        dependency: String,
        item_id: String,
    },
    /// Output row for an item that is not in the catalog.
    UnknownItem { stage: String, item_id: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::MissingDependency {
                stage,
                dependency,
                item_id,
            } => write!(f, "{}: item {} complete but {} is not", stage, item_id, dependency),
            Violation::UnknownItem { stage, item_id } => {
                write!(f, "{}: output for unknown item {}", stage, item_id)
            }
        }
    }
}

/// Derives gap reports from the store for a registry.
#[derive(Debug, Clone, Copy)]
pub struct CompletionScanner<'a> {
    registry: &'a StageRegistry,
}

impl<'a> CompletionScanner<'a> {
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self { registry }
    }

    /// Scan every stage in topological order.
    pub fn scan(&self, store: &Store) -> Result<GapReport> {
        if !store.table_exists("items")? {
            log::debug!("No items table yet, every stage reports zero eligible");
            return Ok(GapReport {
                item_total: 0,
                stages: self.registry.stages().iter().map(|s| StageGap::empty(&s.name)).collect(),
            });
        }

        let resolved = self.resolve_all(store)?;
        let mut done: HashMap<&str, bool> = HashMap::new();
        let mut stages = Vec::with_capacity(self.registry.len());
        for stage in self.registry.stages() {
            let (gap, blocked) = self.classify(store, stage, &resolved, &done)?;
            done.insert(stage.name.as_str(), !blocked && gap.is_done());
            stages.push(gap);
        }

        Ok(GapReport {
            item_total: store.item_count()?,
            stages,
        })
    }

    /// Scan a single stage (what a worker does at startup).
    ///
    /// Only the stage and its ancestors are classified.
    pub fn scan_stage(&self, store: &Store, name: &str) -> Result<StageGap> {
        let chain = self.registry.upstream_of(name)?;
        if !store.table_exists("items")? {
            return Ok(StageGap::empty(name));
        }

        let mut resolved = HashMap::new();
        for stage in &chain {
            resolved.insert(stage.name.as_str(), PredicateSql::resolve(stage, store)?);
        }

        let mut done: HashMap<&str, bool> = HashMap::new();
        let mut last = StageGap::empty(name);
        for stage in chain {
            let (gap, blocked) = self.classify(store, stage, &resolved, &done)?;
            done.insert(stage.name.as_str(), !blocked && gap.is_done());
            last = gap;
        }
        Ok(last)
    }

    /// Report items whose stored state breaks the dependency invariant.
    pub fn check_consistency(&self, store: &Store) -> Result<Vec<Violation>> {
        if !store.table_exists("items")? {
            return Ok(Vec::new());
        }

        let resolved = self.resolve_all(store)?;
        let mut violations = Vec::new();

        for stage in self.registry.stages() {
            let own = &resolved[stage.name.as_str()];
            if !own.present {
                continue;
            }

            for dep in &stage.depends_on {
                let sql = query::dependency_violation_sql(own, &resolved[dep.as_str()]);
                for item_id in collect_ids(store, &sql)? {
                    violations.push(Violation::MissingDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                        item_id,
                    });
                }
            }

            if let Some(table) = stage.output_table() {
                for item_id in collect_ids(store, &query::orphan_rows_sql(table))? {
                    violations.push(Violation::UnknownItem {
                        stage: stage.name.clone(),
                        item_id,
                    });
                }
            }
        }

        if !violations.is_empty() {
            log::warn!("Consistency check found {} violations", violations.len());
        }
        Ok(violations)
    }

    fn resolve_all(&self, store: &Store) -> Result<HashMap<&'a str, PredicateSql>> {
        self.registry
            .stages()
            .iter()
            .map(|s| -> Result<(&'a str, PredicateSql)> { Ok((s.name.as_str(), PredicateSql::resolve(s, store)?)) })
            .collect()
    }

    /// `done` holds the outcome of every upstream stage already classified in
    /// this scan. The flag is true when the stage is held back by an upstream
    /// stage; a held stage is never done, whatever its gap says.
    fn classify(
        &self,
        store: &Store,
        stage: &Stage,
        resolved: &HashMap<&str, PredicateSql>,
        done: &HashMap<&str, bool>,
    ) -> Result<(StageGap, bool)> {
        let own = &resolved[stage.name.as_str()];
        let deps: Vec<&PredicateSql> = stage.depends_on.iter().map(|d| &resolved[d.as_str()]).collect();

        // An absent dependency table means nothing is eligible yet.
        if deps.iter().any(|d| !d.present) {
            return Ok((StageGap::empty(&stage.name), true));
        }

        if stage.gate() == DependencyGate::Barrier
            && let Some(open) = stage
                .depends_on
                .iter()
                .find(|d| !done.get(d.as_str()).copied().unwrap_or(false))
        {
            log::trace!("{} waits for {} to drain", stage.name, open);
            return Ok((StageGap::empty(&stage.name), true));
        }

        let sql = classify_sql(own, &deps);
        let mut stmt = store.conn().prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut gap = StageGap::empty(&stage.name);
        for row in rows {
            let (item_id, class) = row?;
            gap.eligible_total += 1;
            match class.as_str() {
                "c" => gap.complete_count += 1,
                "f" => gap.failed_count += 1,
                _ => gap.pending_ids.push(item_id),
            }
        }

        log::trace!(
            "Scanned {}: eligible={} complete={} failed={} pending={}",
            stage.name,
            gap.eligible_total,
            gap.complete_count,
            gap.failed_count,
            gap.pending_count()
        );
        Ok((gap, false))
    }
}

fn collect_ids(store: &Store, sql: &str) -> Result<Vec<String>> {
    let mut stmt = store.conn().prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CompletionPredicate, FixAction, ResourceClass, StageDefaults};

    fn registry(stages: Vec<Stage>) -> StageRegistry {
        StageRegistry::new(stages, &StageDefaults::default()).unwrap()
    }

    fn stage(name: &str, deps: &[&str]) -> Stage {
        let mut s = Stage::new(name, ResourceClass::CpuParallel, FixAction::new("w"));
        s.depends_on = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    fn seed_items(store: &Store, n: usize) -> Vec<String> {
        let ids: Vec<String> = (0..n).map(|i| format!("item-{:03}", i)).collect();
        for id in &ids {
            store.insert_item_with_id(id, id).unwrap();
        }
        ids
    }

    fn mark(store: &Store, table: &str, ids: &[String], status: &str) {
        store.ensure_output_table(table).unwrap();
        for id in ids {
            store
                .conn()
                .execute(
                    &format!("INSERT OR REPLACE INTO {table} (item_id, status, updated_at) VALUES (?1, ?2, 0)"),
                    [id.as_str(), status],
                )
                .unwrap();
        }
    }

    #[test]
    fn test_empty_store_reports_zero() {
        let reg = registry(vec![stage("a", &[])]);
        let store = Store::open_in_memory().unwrap();
        let report = CompletionScanner::new(&reg).scan(&store).unwrap();
        assert_eq!(report.item_total, 0);
        assert!(report.is_complete());
        assert_eq!(report.stages.len(), 1);
    }

    #[test]
    fn test_missing_output_table_is_zero_percent() {
        let reg = registry(vec![stage("a", &[])]);
        let store = Store::open_in_memory().unwrap();
        seed_items(&store, 5);
        let report = CompletionScanner::new(&reg).scan(&store).unwrap();
        let a = report.get("a").unwrap();
        assert_eq!(a.eligible_total, 5);
        assert_eq!(a.complete_count, 0);
        assert_eq!(a.pending_count(), 5);
    }

    #[test]
    fn test_barrier_waits_for_upstream_drain() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 100);
        mark(&store, "a", &ids[..40], "ok");

        let scanner = CompletionScanner::new(&reg);
        let report = scanner.scan(&store).unwrap();
        assert_eq!(report.get("a").unwrap().pending_count(), 60);
        assert_eq!(report.get("b").unwrap().pending_count(), 0);
        assert_eq!(scanner.scan_stage(&store, "b").unwrap().pending_count(), 0);

        mark(&store, "a", &ids[40..], "ok");
        let report = scanner.scan(&store).unwrap();
        assert_eq!(report.get("a").unwrap().pending_count(), 0);
        assert_eq!(report.get("b").unwrap().pending_count(), 100);
        assert_eq!(scanner.scan_stage(&store, "b").unwrap().pending_count(), 100);
    }

    #[test]
    fn test_barrier_holds_the_whole_chain() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"]), stage("c", &["b"])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 10);
        mark(&store, "a", &ids[..5], "ok");
        mark(&store, "b", &ids[..5], "ok");

        let scanner = CompletionScanner::new(&reg);
        let report = scanner.scan(&store).unwrap();
        assert_eq!(report.get("a").unwrap().pending_count(), 5);
        for name in ["b", "c"] {
            let gap = report.get(name).unwrap();
            assert_eq!(gap.pending_count(), 0, "{}", name);
            assert_eq!(gap.eligible_total, 0, "{}", name);
        }
        assert_eq!(scanner.scan_stage(&store, "c").unwrap().eligible_total, 0);

        mark(&store, "a", &ids[5..], "ok");
        let report = scanner.scan(&store).unwrap();
        assert_eq!(report.get("b").unwrap().pending_count(), 5);
        assert_eq!(report.get("c").unwrap().pending_count(), 0);
        assert_eq!(scanner.scan_stage(&store, "c").unwrap().pending_count(), 0);

        mark(&store, "b", &ids[5..], "ok");
        let report = scanner.scan(&store).unwrap();
        assert_eq!(report.get("c").unwrap().pending_count(), 10);
    }

    #[test]
    fn test_item_gate_pipelines() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"]).with_gate(DependencyGate::Item)]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 100);
        mark(&store, "a", &ids[..40], "ok");

        let scanner = CompletionScanner::new(&reg);
        let report = scanner.scan(&store).unwrap();
        assert_eq!(report.get("a").unwrap().pending_count(), 60);
        assert_eq!(report.get("b").unwrap().pending_count(), 40);
        assert_eq!(report.get("b").unwrap().eligible_total, 40);
        assert_eq!(scanner.scan_stage(&store, "b").unwrap(), report.get("b").unwrap().clone());
    }

    #[test]
    fn test_empty_sentinel_counts_as_complete() {
        let reg = registry(vec![stage("ocr", &[])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 3);
        mark(&store, "ocr", &ids[..1], "empty");
        mark(&store, "ocr", &ids[1..2], "ok");
        let gap = CompletionScanner::new(&reg).scan_stage(&store, "ocr").unwrap();
        assert_eq!(gap.complete_count, 2);
        assert_eq!(gap.pending_ids, vec![ids[2].clone()]);
    }

    #[test]
    fn test_failed_items_leave_pending_and_block_downstream() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 4);
        mark(&store, "a", &ids[..2], "ok");
        mark(&store, "a", &ids[2..], "failed");

        let report = CompletionScanner::new(&reg).scan(&store).unwrap();
        let a = report.get("a").unwrap();
        assert_eq!(a.failed_count, 2);
        assert_eq!(a.pending_count(), 0);
        assert_eq!(report.get("b").unwrap().eligible_total, 2);
    }

    #[test]
    fn test_query_predicate() {
        let render = stage("render", &[]).with_predicate(CompletionPredicate::Query(
            "SELECT item_id FROM tiers WHERE path IS NOT NULL".to_string(),
        ));
        let reg = registry(vec![render, stage("faces", &["render"]).with_gate(DependencyGate::Item)]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 3);

        let report = CompletionScanner::new(&reg).scan(&store).unwrap();
        assert_eq!(report.get("render").unwrap().pending_count(), 3);
        assert_eq!(report.get("faces").unwrap().eligible_total, 0);

        store
            .conn()
            .execute_batch("CREATE TABLE tiers (item_id TEXT PRIMARY KEY, path TEXT)")
            .unwrap();
        store
            .conn()
            .execute("INSERT INTO tiers VALUES (?1, 'x.webp')", [ids[0].as_str()])
            .unwrap();

        let report = CompletionScanner::new(&reg).scan(&store).unwrap();
        assert_eq!(report.get("render").unwrap().pending_count(), 2);
        assert_eq!(report.get("faces").unwrap().pending_ids, vec![ids[0].clone()]);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 20);
        mark(&store, "a", &ids[..7], "ok");
        let scanner = CompletionScanner::new(&reg);
        assert_eq!(scanner.scan(&store).unwrap(), scanner.scan(&store).unwrap());
    }

    #[test]
    fn test_consistency_flags_missing_dependency() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 3);
        mark(&store, "a", &ids[..1], "ok");
        mark(&store, "b", &ids[1..2], "ok");

        let violations = CompletionScanner::new(&reg).check_consistency(&store).unwrap();
        assert_eq!(
            violations,
            vec![Violation::MissingDependency {
                stage: "b".to_string(),
                dependency: "a".to_string(),
                item_id: ids[1].clone(),
            }]
        );
    }

    #[test]
    fn test_consistency_flags_unknown_item() {
        let reg = registry(vec![stage("a", &[])]);
        let store = Store::open_in_memory().unwrap();
        seed_items(&store, 1);
        mark(&store, "a", &["ghost".to_string()], "ok");
        let violations = CompletionScanner::new(&reg).check_consistency(&store).unwrap();
        assert!(matches!(&violations[..], [Violation::UnknownItem { item_id, .. }] if item_id == "ghost"));
    }

    #[test]
    fn test_consistent_store_has_no_violations() {
        let reg = registry(vec![stage("a", &[]), stage("b", &["a"])]);
        let store = Store::open_in_memory().unwrap();
        let ids = seed_items(&store, 3);
        mark(&store, "a", &ids, "ok");
        mark(&store, "b", &ids[..2], "empty");
        assert!(CompletionScanner::new(&reg).check_consistency(&store).unwrap().is_empty());
    }
}
