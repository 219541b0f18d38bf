use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Source of the memory figure compared against the queue's ceiling.
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently in use, or `None` when unknown. Unknown never blocks.
    fn used_bytes(&self) -> Option<u64>;
}

/// Resident memory of the current process.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|err| tracing::warn!(err, "cannot resolve current pid; memory ceiling disabled"))
            .ok();
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| process.memory())
    }
}

/// Probe that always reports the same value.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMemoryProbe(pub Option<u64>);

impl MemoryProbe for FixedMemoryProbe {
    fn used_bytes(&self) -> Option<u64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_probe_reports_some_memory() {
        let probe = ProcessMemoryProbe::new();
        let used = probe.used_bytes().unwrap_or(0);
        assert!(used < u64::MAX);
    }

    #[test]
    fn fixed_probe_returns_value() {
        assert_eq!(FixedMemoryProbe(Some(42)).used_bytes(), Some(42));
        assert_eq!(FixedMemoryProbe(None).used_bytes(), None);
    }
}
