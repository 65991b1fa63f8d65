//! Stage definitions.
//!
//! A stage is a named unit of work over the item catalog. Stages are declared in
//! configuration and never change during a run.

use serde::{Deserialize, Serialize};

/// Retry ceiling used when neither the stage nor the defaults set one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Zero-progress scans tolerated before a live worker is killed.
pub const DEFAULT_STALL_SCANS: u32 = 6;

/// Resource class of a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    /// At most one such stage may have live workers system-wide.
    ExclusiveAccelerator,
    /// Any number of shards may run concurrently.
    CpuParallel,
    /// Bounded external concurrency, independent of the accelerator lock.
    RateLimitedApi,
}

impl ResourceClass {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::ExclusiveAccelerator => "exclusive-accelerator",
            ResourceClass::CpuParallel => "cpu-parallel",
            ResourceClass::RateLimitedApi => "rate-limited-api",
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// When a stage's items become eligible relative to its dependencies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DependencyGate {
    /// Every dependency stage must have nothing pending before any item is
    /// eligible. Upstream gaps are closed before downstream work starts.
    #[default]
    Barrier,
    /// An item is eligible as soon as its own dependencies are complete, so
    /// downstream work pipelines behind a running upstream stage.
    Item,
}

/// How the scanner decides whether an item already has output for a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPredicate {
    /// Output table keyed by `item_id` with a `status` column.
    ///
    /// `ok` and `empty` rows are complete, `failed` rows are permanently failed,
    /// anything else is pending.
    Table(String),
    /// A `SELECT` returning the IDs of complete items. Has no failure set.
    Query(String),
}

/// External command that performs a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixAction {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl FixAction {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Full argument vector for one invocation, shard flags appended when given.
    pub fn command_line(&self, shard: Option<(usize, usize)>) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 5);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        if let Some((index, count)) = shard {
            argv.push("--shard".to_string());
            argv.push(index.to_string());
            argv.push("--shard-count".to_string());
            argv.push(count.to_string());
        }
        argv
    }
}

/// A named unit of work over the item set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub predicate: CompletionPredicate,
    pub resource_class: ResourceClass,
    #[serde(default)]
    pub shardable: bool,
    pub fix_action: FixAction,
    /// Transient failures tolerated per item before a `failed` sentinel.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Consecutive zero-progress scans before a live worker is killed. 0 disables.
    #[serde(default)]
    pub stall_scans: Option<u32>,
    /// Preferred parallelism for shardable stages.
    #[serde(default)]
    pub shards: Option<usize>,
    /// CPU fallback of an accelerator model: each worker loads the model itself.
    #[serde(default)]
    pub loads_model: bool,
    #[serde(default)]
    pub gate: Option<DependencyGate>,
}

impl Stage {
    /// Create a stage with an output table of the same name.
    pub fn new(name: impl Into<String>, resource_class: ResourceClass, fix_action: FixAction) -> Self {
        let name = name.into();
        Self {
            predicate: CompletionPredicate::Table(name.clone()),
            name,
            depends_on: Vec::new(),
            resource_class,
            shardable: false,
            fix_action,
            max_retries: None,
            stall_scans: None,
            shards: None,
            loads_model: false,
            gate: None,
        }
    }

    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.depends_on.push(stage.into());
        self
    }

    pub fn with_predicate(mut self, predicate: CompletionPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn sharded(mut self, shards: Option<usize>) -> Self {
        self.shardable = true;
        self.shards = shards;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_stall_scans(mut self, scans: u32) -> Self {
        self.stall_scans = Some(scans);
        self
    }

    pub fn with_model(mut self) -> Self {
        self.loads_model = true;
        self
    }

    pub fn with_gate(mut self, gate: DependencyGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Table the stage writes, if its predicate is table-backed.
    pub fn output_table(&self) -> Option<&str> {
        match &self.predicate {
            CompletionPredicate::Table(table) => Some(table),
            CompletionPredicate::Query(_) => None,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn stall_scans(&self) -> u32 {
        self.stall_scans.unwrap_or(DEFAULT_STALL_SCANS)
    }

    pub fn gate(&self) -> DependencyGate {
        self.gate.unwrap_or_default()
    }

    pub fn is_exclusive(&self) -> bool {
        self.resource_class == ResourceClass::ExclusiveAccelerator
    }
}

/// Per-stage tuning applied where a stage leaves a value unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageDefaults {
    pub max_retries: u32,
    pub stall_scans: u32,
    pub gate: DependencyGate,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            stall_scans: DEFAULT_STALL_SCANS,
            gate: DependencyGate::Barrier,
        }
    }
}

/// SQL identifier check for table names that get interpolated into queries.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
