//! Resident memory sampling for `memory` progress frames.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples the resident set size of the current process.
///
/// Only this process is refreshed on each sample, so sampling after every
/// unit stays cheap.
pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl MemorySampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                log::debug!("Memory sampling unavailable: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Current resident memory in MB, or `None` on unsupported platforms.
    pub fn resident_mb(&mut self) -> Option<f64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        let bytes = self.system.process(pid)?.memory();
        Some(bytes as f64 / BYTES_PER_MB)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}
