//! Stage registry.
//!
//! The registry is the static description of every stage in the pipeline. It is
//! validated once at startup; any failure here is fatal because nothing else can
//! be trusted to iterate an invalid graph.
//!
//! # Example
//!
//! ```ignore
//! use stagehand::registry::{FixAction, ResourceClass, Stage, StageDefaults, StageRegistry};
//!
//! let registry = StageRegistry::new(
//!     vec![
//!         Stage::new("render", ResourceClass::CpuParallel, FixAction::new("render")),
//!         Stage::new("ocr", ResourceClass::ExclusiveAccelerator, FixAction::new("ocr")).depends_on("render"),
//!     ],
//!     &StageDefaults::default(),
//! )?;
//! for stage in registry.stages() {
//!     println!("{}", stage.name);
//! }
//! ```

mod graph;
mod stage;

pub use graph::topological_order;
pub use stage::{
    CompletionPredicate, DEFAULT_MAX_RETRIES, DEFAULT_STALL_SCANS, DependencyGate, FixAction, ResourceClass, Stage,
    StageDefaults, is_identifier,
};

use std::collections::{HashMap, HashSet};

use crate::error::{Result, StagehandError};

/// Validated, topologically ordered set of stages.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    /// Stages in topological order.
    ordered: Vec<Stage>,
    /// Name to position in `ordered`.
    index: HashMap<String, usize>,
}

impl StageRegistry {
    /// Validate the stages and cache their topological order.
    ///
    /// Unset per-stage tuning is filled from `defaults`.
    pub fn new(stages: Vec<Stage>, defaults: &StageDefaults) -> Result<Self> {
        validate(&stages)?;

        let order = topological_order(&stages)?;
        let mut slots: Vec<Option<Stage>> = stages.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        for position in order {
            if let Some(mut stage) = slots[position].take() {
                stage.max_retries.get_or_insert(defaults.max_retries);
                stage.stall_scans.get_or_insert(defaults.stall_scans);
                stage.gate.get_or_insert(defaults.gate);
                ordered.push(stage);
            }
        }

        let index = ordered
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        log::debug!(
            "Stage registry order: {}",
            ordered.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self { ordered, index })
    }

    /// All stages, upstream before downstream.
    pub fn stages(&self) -> &[Stage] {
        &self.ordered
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Result<&Stage> {
        self.index
            .get(name)
            .map(|&i| &self.ordered[i])
            .ok_or_else(|| StagehandError::UnknownStage(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// `name` and every stage it depends on, directly or transitively, in order.
    pub fn upstream_of(&self, name: &str) -> Result<Vec<&Stage>> {
        let target = self.stage(name)?;
        let mut needed: HashSet<&str> = HashSet::from([target.name.as_str()]);
        let mut result = Vec::new();
        for stage in self.ordered.iter().rev() {
            if needed.contains(stage.name.as_str()) {
                needed.extend(stage.depends_on.iter().map(String::as_str));
                result.push(stage);
            }
        }
        result.reverse();
        Ok(result)
    }

    /// Every stage that depends on `name`, directly or transitively, in order.
    pub fn downstream_of(&self, name: &str) -> Result<Vec<&Stage>> {
        self.stage(name)?;
        let mut affected: HashSet<&str> = HashSet::from([name]);
        let mut result = Vec::new();
        // Topological order guarantees a stage's deps are visited before it.
        for stage in &self.ordered {
            if stage.depends_on.iter().any(|d| affected.contains(d.as_str())) {
                affected.insert(stage.name.as_str());
                result.push(stage);
            }
        }
        Ok(result)
    }
}

/// Structural checks that do not need the graph.
fn validate(stages: &[Stage]) -> Result<()> {
    let mut names = HashSet::new();
    let mut tables: HashMap<String, &str> = HashMap::new();
    for stage in stages {
        if stage.name.trim().is_empty() {
            return Err(StagehandError::Registry("stage with empty name".to_string()));
        }
        if !names.insert(stage.name.as_str()) {
            return Err(StagehandError::Registry(format!("duplicate stage: {}", stage.name)));
        }
        if stage.fix_action.program.trim().is_empty() {
            return Err(StagehandError::Registry(format!(
                "stage {} has an empty fix_action program",
                stage.name
            )));
        }
        match &stage.predicate {
            CompletionPredicate::Table(table) if !is_identifier(table) => {
                return Err(StagehandError::Registry(format!(
                    "stage {} has invalid output table name: {:?}",
                    stage.name, table
                )));
            }
            CompletionPredicate::Query(sql) if !is_select(sql) => {
                return Err(StagehandError::Registry(format!(
                    "stage {} predicate query must be a single SELECT",
                    stage.name
                )));
            }
            CompletionPredicate::Table(table) if is_reserved_table(table) => {
                return Err(StagehandError::Registry(format!(
                    "stage {} cannot write to reserved table {}",
                    stage.name, table
                )));
            }
            CompletionPredicate::Table(table) => {
                // SQLite table names are case-insensitive
                if let Some(owner) = tables.insert(table.to_ascii_lowercase(), stage.name.as_str()) {
                    return Err(StagehandError::Registry(format!(
                        "stages {} and {} share output table {}",
                        owner, stage.name, table
                    )));
                }
            }
            _ => {}
        }
        if stage.shards == Some(0) {
            return Err(StagehandError::Registry(format!("stage {} has shards: 0", stage.name)));
        }
    }

    for stage in stages {
        for dep in &stage.depends_on {
            if dep == &stage.name {
                return Err(StagehandError::DependencyCycle(stage.name.clone()));
            }
            if !names.contains(dep.as_str()) {
                return Err(StagehandError::Registry(format!(
                    "stage {} depends on unknown stage {}",
                    stage.name, dep
                )));
            }
        }
    }

    Ok(())
}

/// Catalog and bookkeeping tables; a reset would delete from them.
fn is_reserved_table(table: &str) -> bool {
    let lower = table.to_ascii_lowercase();
    lower == "items" || lower == "stage_attempts" || lower.starts_with("sqlite_")
}

fn is_select(sql: &str) -> bool {
    let trimmed = sql.trim().trim_end_matches(';');
    trimmed.get(..6).is_some_and(|head| head.eq_ignore_ascii_case("select")) && !trimmed.contains(';')
}
