//! YAML configuration shared by the orchestrator and worker binaries.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::daemon::ControlConfig;
use crate::error::{Result, StagehandError};
use crate::registry::{FixAction, Stage, StageDefaults, StageRegistry};
use crate::scheduler::SchedulerConfig;
use crate::store::StoreOptions;
use crate::writer::WriterConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub store: StoreConfig,
    pub control: ControlSection,
    pub scheduler: SchedulerConfig,
    pub defaults: StageDefaults,
    pub writer: WriterConfig,
    /// Run once each time the pipeline drains.
    pub export: Option<FixAction>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stagehand")
                .join("stagehand.db"),
            busy_timeout_ms: StoreOptions::default().busy_timeout_ms,
        }
    }
}

impl StoreConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSection {
    pub interval_secs: u64,
    /// Per-worker stdout/stderr files land here; discarded when unset.
    pub worker_log_dir: Option<PathBuf>,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            worker_log_dir: None,
        }
    }
}

impl ControlSection {
    pub fn control_config(&self) -> ControlConfig {
        ControlConfig::new(Duration::from_secs(self.interval_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            store: StoreConfig::default(),
            control: ControlSection::default(),
            scheduler: SchedulerConfig::default(),
            defaults: StageDefaults::default(),
            writer: WriterConfig::default(),
            export: None,
            stages: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)
            .map_err(|e| StagehandError::Config(format!("{}: {}", path.display(), e)))?;
        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| StagehandError::Config(e.to_string()))
    }

    /// Validate the declared stages into a registry.
    pub fn registry(&self) -> Result<StageRegistry> {
        StageRegistry::new(self.stages.clone(), &self.defaults)
    }
}
