//! Downstream export trigger.
//!
//! Fires the configured export action once each time the pipeline goes from
//! "something pending" to "nothing pending". A cold start counts as coming from
//! "something pending".

use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{Result, StagehandError};
use crate::registry::FixAction;

#[derive(Debug, Default)]
pub struct ExportTrigger {
    action: Option<FixAction>,
    was_complete: bool,
    running: Option<Child>,
}

impl ExportTrigger {
    pub fn new(action: Option<FixAction>) -> Self {
        Self {
            action,
            was_complete: false,
            running: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.action.is_some()
    }

    /// Feed one scan's completeness. Returns true on a transition into complete.
    pub fn observe(&mut self, complete: bool) -> bool {
        let transition = complete && !self.was_complete;
        self.was_complete = complete;
        transition
    }

    /// Start the export action without waiting for it. A no-op when none is
    /// configured.
    pub fn fire(&mut self) -> Result<bool> {
        self.reap();
        let Some(action) = &self.action else {
            return Ok(false);
        };
        if self.running.is_some() {
            log::warn!("Previous export still running, starting another");
        }

        let child = Command::new(&action.program)
            .args(&action.args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| StagehandError::Spawn {
                stage: "export".to_string(),
                message: format!("{}: {}", action.program, e),
            })?;
        log::info!("Pipeline complete, started export {} (pid {:?})", action.program, child.id());
        self.running = Some(child);
        Ok(true)
    }

    /// Log the exit of a previous export, if it finished.
    pub fn reap(&mut self) {
        let Some(child) = &mut self.running else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                log::info!("Export finished");
                self.running = None;
            }
            Ok(Some(status)) => {
                log::warn!("Export exited with {}", status);
                self.running = None;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Could not poll export: {}", e);
                self.running = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_transition() {
        let mut trigger = ExportTrigger::new(None);
        assert!(trigger.observe(true), "cold start counts as a transition");
        assert!(!trigger.observe(true));
        assert!(!trigger.observe(false));
        assert!(!trigger.observe(false));
        assert!(trigger.observe(true));
        assert!(!trigger.observe(true));
    }

    #[test]
    fn test_incomplete_start_does_not_fire() {
        let mut trigger = ExportTrigger::new(None);
        assert!(!trigger.observe(false));
        assert!(trigger.observe(true));
    }

    #[tokio::test]
    async fn test_fire_without_action_is_noop() {
        let mut trigger = ExportTrigger::new(None);
        assert!(!trigger.is_configured());
        assert!(!trigger.fire().unwrap());
    }

    #[tokio::test]
    async fn test_fire_runs_action() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("exported");
        let action = FixAction::new("touch").arg(marker.to_string_lossy());
        let mut trigger = ExportTrigger::new(Some(action));
        assert!(trigger.fire().unwrap());

        for _ in 0..200 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_fire_missing_program_errors() {
        let mut trigger = ExportTrigger::new(Some(FixAction::new("/nonexistent/stagehand-export")));
        assert!(trigger.fire().is_err());
    }
}
