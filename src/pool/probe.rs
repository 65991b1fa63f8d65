//! OS process inspection.
//!
//! Workers outlive the orchestrator, so on restart the only record of what is
//! running is the process table. The probe is a trait so supervision logic can
//! be tested without real processes.

use std::path::Path;

use sysinfo::{Pid, ProcessStatus, System};

use crate::registry::FixAction;

/// A process as seen in the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmd: Vec<String>,
}

/// Read access to the process table plus the ability to signal a process.
pub trait ProcessProbe {
    /// Every visible process with a non-empty command line.
    fn processes(&mut self) -> Vec<ProcessInfo>;

    /// Whether `pid` is running (zombies count as exited).
    fn is_alive(&mut self, pid: u32) -> bool;

    /// Ask the OS to terminate `pid`. Returns false if it could not be signalled.
    fn kill(&mut self, pid: u32) -> bool;
}

/// `ProcessProbe` backed by `sysinfo`.
pub struct SystemProbe {
    system: System,
    own_pid: u32,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProbe {
    fn processes(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes();
        self.system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != self.own_pid && !process.cmd().is_empty() && process.status() != ProcessStatus::Zombie
            })
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                cmd: process.cmd().to_vec(),
            })
            .collect()
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        if !self.system.refresh_process(pid) {
            return false;
        }
        self.system
            .process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    fn kill(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.system.refresh_process(pid);
        self.system.process(pid).is_some_and(|p| p.kill())
    }
}

/// Whether a command line is an invocation of `action`.
///
/// The program is compared by file name so `/usr/local/bin/ocr` matches a
/// configured `ocr`; the fixed arguments must follow it verbatim.
pub fn matches_fix_action(cmd: &[String], action: &FixAction) -> bool {
    let Some((program, rest)) = cmd.split_first() else {
        return false;
    };
    if program != &action.program && file_name(program) != file_name(&action.program) {
        return false;
    }
    rest.len() >= action.args.len() && rest.iter().zip(&action.args).all(|(a, b)| a == b)
}

fn file_name(path: &str) -> &str {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_by_program_and_args() {
        let action = FixAction::new("ocr-worker").arg("--model").arg("small");
        assert!(matches_fix_action(
            &cmd(&["ocr-worker", "--model", "small", "--shard", "0", "--shard-count", "2"]),
            &action
        ));
        assert!(matches_fix_action(&cmd(&["/opt/bin/ocr-worker", "--model", "small"]), &action));
        assert!(!matches_fix_action(&cmd(&["ocr-worker", "--model", "large"]), &action));
        assert!(!matches_fix_action(&cmd(&["ocr-worker"]), &action));
        assert!(!matches_fix_action(&cmd(&["faces-worker", "--model", "small"]), &action));
        assert!(!matches_fix_action(&[], &action));
    }

    #[test]
    fn test_system_probe_sees_itself_alive() {
        let mut probe = SystemProbe::new();
        assert!(probe.is_alive(std::process::id()));
        // The probe hides its own process from listings.
        assert!(probe.processes().iter().all(|p| p.pid != std::process::id()));
    }

    #[test]
    fn test_fake_probe_kill() {
        let mut probe = fake::FakeProbe::default().with(10, &["ocr"]);
        assert!(probe.is_alive(10));
        assert!(probe.kill(10));
        assert!(!probe.is_alive(10));
        assert_eq!(probe.killed, vec![10]);
    }
}
