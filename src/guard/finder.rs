use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use super::ProcessHandle;

/// Looks processes up by name or pid through `sysinfo`.
pub struct ProcessFinder {
    system: System,
}

impl Default for ProcessFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFinder {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// First running process whose name contains `process_name`, ignoring case.
    pub fn find(&mut self, process_name: &str) -> Option<ProcessHandle> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let wanted = process_name.to_lowercase();
        let mut matches: Vec<ProcessHandle> = self
            .system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let name = process.name().to_string_lossy().into_owned();
                name.to_lowercase()
                    .contains(&wanted)
                    .then(|| ProcessHandle::new(pid.as_u32(), name))
            })
            .collect();
        // Lowest pid first so repeated lookups agree
        matches.sort_by_key(|handle| handle.pid);
        debug!(target: "logic_engine::guard", process_name, found = matches.len(), "Process lookup");
        matches.into_iter().next()
    }

    /// Name of a live process, refreshing only that pid.
    pub fn name_of(&mut self, pid: u32) -> Option<String> {
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|process| process.name().to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_of_current_process() {
        let mut finder = ProcessFinder::new();
        let name = finder.name_of(std::process::id());
        assert!(name.is_some_and(|n| !n.is_empty()));
    }

    #[test]
    fn test_find_current_process_by_name() {
        let mut finder = ProcessFinder::new();
        let own = finder.name_of(std::process::id()).unwrap();
        let found = finder.find(&own.to_uppercase()).unwrap();
        assert!(found.name.to_lowercase().contains(&own.to_lowercase()));
    }

    #[test]
    fn test_unknown_process() {
        let mut finder = ProcessFinder::new();
        assert!(finder.find("definitely-not-a-running-process-name").is_none());
    }
}
