//! Key identity and normalization.
//!
//! Turns the raw `(virtual key, scan code, flags)` triple reported by the
//! low-level hook into a canonical [`KeyEvent`]. Everything here is pure: the
//! caller supplies the modifier state it sampled.

use serde::Serialize;

use crate::config::{KeyAction, Modifiers};

pub const VK_LBUTTON: u32 = 0x01;
pub const VK_RETURN: u32 = 0x0D;
pub const VK_SHIFT: u32 = 0x10;
pub const VK_CONTROL: u32 = 0x11;
pub const VK_MENU: u32 = 0x12;
pub const VK_SPACE: u32 = 0x20;
pub const VK_LWIN: u32 = 0x5B;
pub const VK_RWIN: u32 = 0x5C;
pub const VK_LSHIFT: u32 = 0xA0;
pub const VK_RSHIFT: u32 = 0xA1;
pub const VK_LCONTROL: u32 = 0xA2;
pub const VK_RCONTROL: u32 = 0xA3;
pub const VK_LMENU: u32 = 0xA4;
pub const VK_RMENU: u32 = 0xA5;

pub const SCAN_ENTER: u32 = 0x1C;
pub const SCAN_RSHIFT: u32 = 0x36;

/// Bit folded into a scan code to mark an E0-prefixed (extended) key.
pub const EXTENDED_SCAN_BIT: u32 = 0x100;

/// Synthetic scan code for keypad Enter: main Enter's scan code plus the
/// extended bit, so both keys stay distinguishable in triggers and replay.
pub const NUMPAD_ENTER_SCAN: u32 = SCAN_ENTER | EXTENDED_SCAN_BIT;
pub const NUMPAD_ENTER_NAME: &str = "Num Enter";

/// `KBDLLHOOKSTRUCT.flags` bits.
pub const LLKHF_EXTENDED: u32 = 0x01;
pub const LLKHF_INJECTED: u32 = 0x10;

#[derive(Debug, Copy, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyTransition {
    Pressed,
    Released,
}

/// Unprocessed data from the OS hook.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub virtual_key: u32,
    pub scan_code: u32,
    pub flags: u32,
    pub transition: KeyTransition,
    /// WM_SYSKEYDOWN / WM_SYSKEYUP.
    pub is_system: bool,
}

/// Canonical key transition consumed by the engine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub scan_code: u32,
    pub virtual_key: u32,
    pub modifiers: Modifiers,
    pub is_system_key: bool,
    pub is_extended: bool,
    pub transition: KeyTransition,
    /// Generated by SendInput rather than hardware.
    pub injected: bool,
}

impl KeyEvent {
    pub fn new(
        key: impl Into<String>,
        scan_code: u32,
        virtual_key: u32,
        transition: KeyTransition,
    ) -> Self {
        Self {
            key: key.into(),
            scan_code,
            virtual_key,
            modifiers: Modifiers::NONE,
            is_system_key: false,
            is_extended: scan_code & EXTENDED_SCAN_BIT != 0,
            transition,
            injected: false,
        }
    }

    pub fn pressed(key: impl Into<String>, scan_code: u32, virtual_key: u32) -> Self {
        Self::new(key, scan_code, virtual_key, KeyTransition::Pressed)
    }

    pub fn released(key: impl Into<String>, scan_code: u32, virtual_key: u32) -> Self {
        Self::new(key, scan_code, virtual_key, KeyTransition::Released)
    }

    pub fn is_released(&self) -> bool {
        self.transition == KeyTransition::Released
    }
}

/// Normalize a raw hook event.
///
/// Generic Shift/Ctrl/Alt virtual keys are resolved to their left/right
/// variants (Shift by scan code, Ctrl/Alt by the extended flag). Extended keys
/// carry `EXTENDED_SCAN_BIT` in their scan code, so the navigation cluster and
/// the keypad (NumLock off) never share an identity. Keypad Enter also gets
/// its own name.
pub fn normalize(raw: &RawKeyEvent, modifiers: Modifiers) -> KeyEvent {
    let extended = raw.flags & LLKHF_EXTENDED != 0;
    let virtual_key = sided_virtual_key(raw.virtual_key, raw.scan_code, extended);
    let scan_code = if extended {
        (raw.scan_code & 0xFF) | EXTENDED_SCAN_BIT
    } else {
        raw.scan_code
    };

    KeyEvent {
        key: key_name(virtual_key, extended),
        scan_code,
        virtual_key,
        modifiers,
        is_system_key: raw.is_system,
        is_extended: extended,
        transition: raw.transition,
        injected: raw.flags & LLKHF_INJECTED != 0,
    }
}

fn sided_virtual_key(vk: u32, scan_code: u32, extended: bool) -> u32 {
    match vk {
        VK_SHIFT if scan_code == SCAN_RSHIFT => VK_RSHIFT,
        VK_SHIFT => VK_LSHIFT,
        VK_CONTROL if extended => VK_RCONTROL,
        VK_CONTROL => VK_LCONTROL,
        VK_MENU if extended => VK_RMENU,
        VK_MENU => VK_LMENU,
        other => other,
    }
}

/// Display name of a virtual key; this is the key identity triggers store.
pub fn key_name(vk: u32, extended: bool) -> String {
    let fixed = match vk {
        VK_RETURN if extended => NUMPAD_ENTER_NAME,
        0x08 => "Backspace",
        0x09 => "Tab",
        VK_RETURN => "Enter",
        0x13 => "Pause",
        0x14 => "Caps Lock",
        0x1B => "Esc",
        VK_SPACE => "Space",
        0x21 => "Page Up",
        0x22 => "Page Down",
        0x23 => "End",
        0x24 => "Home",
        0x25 => "Left",
        0x26 => "Up",
        0x27 => "Right",
        0x28 => "Down",
        0x2C => "Print Screen",
        0x2D => "Insert",
        0x2E => "Delete",
        VK_LWIN => "Left Win",
        VK_RWIN => "Right Win",
        0x5D => "Menu",
        0x6A => "Num *",
        0x6B => "Num +",
        0x6D => "Num -",
        0x6E => "Num .",
        0x6F => "Num /",
        0x90 => "Num Lock",
        0x91 => "Scroll Lock",
        VK_LSHIFT => "Left Shift",
        VK_RSHIFT => "Right Shift",
        VK_LCONTROL => "Left Ctrl",
        VK_RCONTROL => "Right Ctrl",
        VK_LMENU => "Left Alt",
        VK_RMENU => "Right Alt",
        _ => "",
    };
    if !fixed.is_empty() {
        return fixed.to_string();
    }

    match vk {
        0x30..=0x39 | 0x41..=0x5A => char::from_u32(vk)
            .map(String::from)
            .unwrap_or_else(|| format!("VK_{vk:02X}")),
        0x60..=0x69 => format!("Num {}", vk - 0x60),
        0x70..=0x87 => format!("F{}", vk - 0x6F),
        _ => format!("VK_{vk:02X}"),
    }
}

/// Keys that need `KEYEVENTF_EXTENDEDKEY` when synthesized by virtual key.
pub fn is_extended_key(vk: u32) -> bool {
    matches!(
        vk,
        0x21..=0x28 | 0x2C | 0x2D | 0x2E | VK_LWIN | VK_RWIN | 0x5D | 0x6F | 0x90
            | VK_RCONTROL | VK_RMENU
    )
}

/// Everything needed to replay one physical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: String,
    pub scan_code: u32,
    pub virtual_key: u32,
}

impl KeyStroke {
    /// Recorded `(scan_code, virtual_key)` are kept verbatim; only keypad Enter
    /// is pinned to its synthetic scan code.
    pub fn new(key: impl Into<String>, scan_code: u32, virtual_key: u32) -> Self {
        let key = key.into();
        let scan_code = if key == NUMPAD_ENTER_NAME {
            NUMPAD_ENTER_SCAN
        } else {
            scan_code
        };
        Self {
            key,
            scan_code,
            virtual_key,
        }
    }

    /// A stroke identified by virtual key only (used when releasing held keys).
    pub fn from_virtual_key(virtual_key: u32) -> Self {
        Self {
            key: key_name(virtual_key, false),
            scan_code: 0,
            virtual_key,
        }
    }

    /// Scan code as sent on the wire, without the extended marker.
    pub fn hardware_scan(&self) -> u16 {
        (self.scan_code & 0xFF) as u16
    }

    /// The recorded extended bit wins; the virtual-key table only applies to
    /// strokes without a scan code.
    pub fn is_extended(&self) -> bool {
        if self.scan_code == 0 {
            is_extended_key(self.virtual_key)
        } else {
            self.scan_code & EXTENDED_SCAN_BIT != 0
        }
    }

    pub fn describe(&self, action: KeyAction) -> String {
        format!("{} {action}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(vk: u32, scan: u32, flags: u32) -> RawKeyEvent {
        RawKeyEvent {
            virtual_key: vk,
            scan_code: scan,
            flags,
            transition: KeyTransition::Released,
            is_system: false,
        }
    }

    #[test]
    fn test_left_right_shift_by_scan_code() {
        let left = normalize(&raw(VK_SHIFT, 0x2A, 0), Modifiers::NONE);
        assert_eq!(left.key, "Left Shift");
        assert_eq!(left.virtual_key, VK_LSHIFT);

        let right = normalize(&raw(VK_SHIFT, SCAN_RSHIFT, 0), Modifiers::NONE);
        assert_eq!(right.key, "Right Shift");
        assert_eq!(right.virtual_key, VK_RSHIFT);
    }

    #[test]
    fn test_ctrl_and_alt_by_extended_flag() {
        let lctrl = normalize(&raw(VK_CONTROL, 0x1D, 0), Modifiers::NONE);
        let rctrl = normalize(&raw(VK_CONTROL, 0x1D, LLKHF_EXTENDED), Modifiers::NONE);
        assert_eq!(lctrl.key, "Left Ctrl");
        assert_eq!(rctrl.key, "Right Ctrl");
        assert!(rctrl.is_extended);

        let lalt = normalize(&raw(VK_MENU, 0x38, 0), Modifiers::NONE);
        let ralt = normalize(&raw(VK_MENU, 0x38, LLKHF_EXTENDED), Modifiers::NONE);
        assert_eq!(lalt.virtual_key, VK_LMENU);
        assert_eq!(ralt.virtual_key, VK_RMENU);
        assert_eq!(ralt.scan_code, 0x38 | EXTENDED_SCAN_BIT);
    }

    #[test]
    fn test_nav_cluster_and_keypad_stay_distinct() {
        // Delete on the nav cluster vs keypad `.` with NumLock off: same VK, same raw scan
        let nav = normalize(&raw(0x2E, 0x53, LLKHF_EXTENDED), Modifiers::NONE);
        let pad = normalize(&raw(0x2E, 0x53, 0), Modifiers::NONE);
        assert_eq!(nav.key, pad.key);
        assert_ne!(nav.scan_code, pad.scan_code);
        assert_eq!(nav.scan_code, 0x153);
        assert_eq!(pad.scan_code, 0x53);

        let nav_stroke = KeyStroke::new(nav.key.as_str(), nav.scan_code, nav.virtual_key);
        let pad_stroke = KeyStroke::new(pad.key.as_str(), pad.scan_code, pad.virtual_key);
        assert!(nav_stroke.is_extended());
        assert!(!pad_stroke.is_extended());
        assert_eq!(nav_stroke.hardware_scan(), pad_stroke.hardware_scan());

        for vk in [0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x2D] {
            let a = normalize(&raw(vk, 0x47, LLKHF_EXTENDED), Modifiers::NONE);
            let b = normalize(&raw(vk, 0x47, 0), Modifiers::NONE);
            assert_ne!((a.key.as_str(), a.scan_code), (b.key.as_str(), b.scan_code));
        }
    }

    #[test]
    fn test_virtual_key_stroke_falls_back_to_table() {
        assert!(KeyStroke::from_virtual_key(0x2E).is_extended());
        assert!(!KeyStroke::from_virtual_key(0x41).is_extended());
    }

    #[test]
    fn test_numpad_enter_is_distinct() {
        let main = normalize(&raw(VK_RETURN, SCAN_ENTER, 0), Modifiers::NONE);
        let pad = normalize(&raw(VK_RETURN, SCAN_ENTER, LLKHF_EXTENDED), Modifiers::NONE);
        assert_eq!(main.key, "Enter");
        assert_eq!(main.scan_code, SCAN_ENTER);
        assert_eq!(pad.key, NUMPAD_ENTER_NAME);
        assert_eq!(pad.scan_code, NUMPAD_ENTER_SCAN);
        assert_eq!(pad.virtual_key, main.virtual_key);
    }

    #[test]
    fn test_injected_and_modifiers_carried() {
        let mods = Modifiers {
            ctrl: true,
            ..Modifiers::NONE
        };
        let ev = normalize(&raw(0x41, 30, LLKHF_INJECTED), mods);
        assert_eq!(ev.key, "A");
        assert!(ev.injected);
        assert!(ev.modifiers.ctrl);
    }

    #[test]
    fn test_key_names() {
        assert_eq!(key_name(0x35, false), "5");
        assert_eq!(key_name(0x7B, false), "F12");
        assert_eq!(key_name(0x63, false), "Num 3");
        assert_eq!(key_name(0xFF, false), "VK_FF");
    }

    #[test]
    fn test_numpad_enter_stroke_pins_scan_code() {
        let stroke = KeyStroke::new(NUMPAD_ENTER_NAME, SCAN_ENTER, VK_RETURN);
        assert_eq!(stroke.scan_code, NUMPAD_ENTER_SCAN);
        assert_eq!(stroke.hardware_scan(), SCAN_ENTER as u16);
        assert!(stroke.is_extended());

        let enter = KeyStroke::new("Enter", SCAN_ENTER, VK_RETURN);
        assert!(!enter.is_extended());
    }
}
