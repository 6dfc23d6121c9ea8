//! Hardware key-state probing.

use crate::config::Modifiers;

use super::keys::{VK_CONTROL, VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT};

/// Keyboard virtual keys swept when releasing held keys. Mouse buttons
/// (0x01..=0x06) sit below the range.
pub const SWEEP_RANGE: std::ops::RangeInclusive<u32> = 0x07..=0xFE;

/// Reads whether a virtual key is physically down right now.
pub trait KeyStateProbe: Send + Sync {
    fn is_down(&self, virtual_key: u32) -> bool;
}

/// `GetAsyncKeyState` on Windows; reports every key as up elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKeyState;

impl KeyStateProbe for SystemKeyState {
    #[cfg(windows)]
    fn is_down(&self, virtual_key: u32) -> bool {
        use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
        // High bit set means the key is down
        let state = unsafe { GetAsyncKeyState(virtual_key as i32) };
        (state as u16 & 0x8000) != 0
    }

    #[cfg(not(windows))]
    fn is_down(&self, _virtual_key: u32) -> bool {
        false
    }
}

pub fn current_modifiers(probe: &dyn KeyStateProbe) -> Modifiers {
    Modifiers {
        ctrl: probe.is_down(VK_CONTROL),
        shift: probe.is_down(VK_SHIFT),
        alt: probe.is_down(VK_MENU),
        win: probe.is_down(VK_LWIN) || probe.is_down(VK_RWIN),
    }
}

/// Keyboard virtual keys currently reported down.
pub fn held_keys(probe: &dyn KeyStateProbe) -> Vec<u32> {
    SWEEP_RANGE.filter(|vk| probe.is_down(*vk)).collect()
}

/// Detects a full press-then-release of any watched key.
///
/// The first sample only seeds the state, so a button already held when the
/// wait starts must be released and pressed again.
#[derive(Debug)]
pub struct ClickWatcher {
    keys: Vec<u32>,
    was_down: Option<bool>,
    armed: bool,
}

impl ClickWatcher {
    pub fn new(keys: impl Into<Vec<u32>>) -> Self {
        Self {
            keys: keys.into(),
            was_down: None,
            armed: false,
        }
    }

    /// Sample the probe once. Returns true when the click completed.
    pub fn poll(&mut self, probe: &dyn KeyStateProbe) -> bool {
        let down = self.keys.iter().any(|vk| probe.is_down(*vk));
        let Some(was_down) = self.was_down.replace(down) else {
            return false;
        };
        match (was_down, down) {
            (false, true) => {
                self.armed = true;
                false
            }
            (true, false) if self.armed => {
                self.armed = false;
                true
            }
            _ => false,
        }
    }
}
