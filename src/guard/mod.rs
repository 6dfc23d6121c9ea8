//! Process guard: replay only runs while the bound process owns the
//! foreground window.

pub mod finder;

use std::sync::{Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info};

pub use finder::ProcessFinder;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
}

impl ProcessHandle {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

/// Reports the pid owning the foreground window.
pub trait ForegroundProbe: Send + Sync {
    fn foreground_pid(&self) -> Option<u32>;
}

/// `GetForegroundWindow` + `GetWindowThreadProcessId`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemForeground;

impl ForegroundProbe for SystemForeground {
    #[cfg(windows)]
    fn foreground_pid(&self) -> Option<u32> {
        use windows::Win32::UI::WindowsAndMessaging::{
            GetForegroundWindow, GetWindowThreadProcessId,
        };
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.is_invalid() {
                return None;
            }
            let mut pid = 0u32;
            GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32));
            (pid != 0).then_some(pid)
        }
    }

    #[cfg(not(windows))]
    fn foreground_pid(&self) -> Option<u32> {
        None
    }
}

/// Holds the bound target process and answers whether it is in front.
pub struct ProcessGuard {
    selected: RwLock<Option<ProcessHandle>>,
    probe: Box<dyn ForegroundProbe>,
    finder: Mutex<ProcessFinder>,
}

impl ProcessGuard {
    pub fn new(probe: impl ForegroundProbe + 'static) -> Self {
        Self {
            selected: RwLock::new(None),
            probe: Box::new(probe),
            finder: Mutex::new(ProcessFinder::new()),
        }
    }

    pub fn system() -> Self {
        Self::new(SystemForeground)
    }

    pub fn selected(&self) -> Option<ProcessHandle> {
        self.selected.read().ok().and_then(|slot| slot.clone())
    }

    pub fn set_selected(&self, process: Option<ProcessHandle>) {
        match &process {
            Some(handle) => info!(
                target: "logic_engine::guard",
                pid = handle.pid,
                name = %handle.name,
                "Target process bound"
            ),
            None => info!(target: "logic_engine::guard", "Target process cleared"),
        }
        if let Ok(mut slot) = self.selected.write() {
            *slot = process;
        }
    }

    /// The process owning the foreground window, if any.
    pub fn active_foreground(&self) -> Option<ProcessHandle> {
        let pid = self.probe.foreground_pid()?;
        if let Some(selected) = self.selected().filter(|handle| handle.pid == pid) {
            return Some(selected);
        }
        let name = self
            .finder
            .lock()
            .ok()
            .and_then(|mut finder| finder.name_of(pid))
            .unwrap_or_default();
        Some(ProcessHandle::new(pid, name))
    }

    /// True iff a process is bound and its pid owns the foreground window.
    pub fn is_selected_active(&self) -> bool {
        let Some(selected) = self.selected() else {
            return false;
        };
        let foreground = self.probe.foreground_pid();
        let active = foreground == Some(selected.pid);
        if !active {
            debug!(
                target: "logic_engine::guard",
                selected = selected.pid,
                ?foreground,
                "Target process not in foreground"
            );
        }
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Default)]
    struct FixedForeground(Arc<AtomicU32>);

    impl ForegroundProbe for FixedForeground {
        fn foreground_pid(&self) -> Option<u32> {
            match self.0.load(Ordering::SeqCst) {
                0 => None,
                pid => Some(pid),
            }
        }
    }

    #[test]
    fn test_nothing_selected_is_never_active() {
        let probe = FixedForeground::default();
        probe.0.store(42, Ordering::SeqCst);
        let guard = ProcessGuard::new(probe);
        assert!(guard.selected().is_none());
        assert!(!guard.is_selected_active());
    }

    #[test]
    fn test_active_follows_foreground_pid() {
        let probe = FixedForeground::default();
        let guard = ProcessGuard::new(probe.clone());
        guard.set_selected(Some(ProcessHandle::new(42, "game.exe")));

        probe.0.store(42, Ordering::SeqCst);
        assert!(guard.is_selected_active());
        assert_eq!(guard.active_foreground().unwrap().name, "game.exe");

        probe.0.store(7, Ordering::SeqCst);
        assert!(!guard.is_selected_active());
        assert_eq!(guard.active_foreground().unwrap().pid, 7);

        probe.0.store(0, Ordering::SeqCst);
        assert!(!guard.is_selected_active());
        assert!(guard.active_foreground().is_none());
    }
}
