//! Scan-code key synthesis.
//!
//! Keys are replayed with the scan code that was recorded, so the target sees
//! the same physical key regardless of the active keyboard layout. A stroke
//! without a scan code falls back to its virtual key.

use anyhow::Result;

use crate::config::KeyAction;

use super::keys::KeyStroke;

#[cfg(windows)]
pub fn send_key(stroke: &KeyStroke, action: KeyAction) -> Result<()> {
    use anyhow::bail;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        INPUT, INPUT_0, INPUT_KEYBOARD, KEYBD_EVENT_FLAGS, KEYBDINPUT, KEYEVENTF_EXTENDEDKEY,
        KEYEVENTF_KEYUP, KEYEVENTF_SCANCODE, SendInput, VIRTUAL_KEY,
    };

    let mut flags = KEYBD_EVENT_FLAGS(0);
    let (w_vk, w_scan) = if stroke.scan_code != 0 {
        flags |= KEYEVENTF_SCANCODE;
        (VIRTUAL_KEY(0), stroke.hardware_scan())
    } else {
        (VIRTUAL_KEY(stroke.virtual_key as u16), 0)
    };
    if stroke.is_extended() {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }
    if action == KeyAction::Release {
        flags |= KEYEVENTF_KEYUP;
    }

    let input = [INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: w_vk,
                wScan: w_scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }];
    let sent = unsafe { SendInput(&input, std::mem::size_of::<INPUT>() as i32) };
    if sent != 1 {
        bail!(
            "SendInput rejected {} {action} (scan 0x{:X}, vk 0x{:X})",
            stroke.key,
            stroke.scan_code,
            stroke.virtual_key
        );
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn send_key(stroke: &KeyStroke, action: KeyAction) -> Result<()> {
    use enigo::{Direction, Enigo, Key, Keyboard as _, Settings};

    let direction = match action {
        KeyAction::Press => Direction::Press,
        KeyAction::Release => Direction::Release,
    };
    let mut enigo = Enigo::new(&Settings::default())?;
    enigo.key(Key::Other(stroke.virtual_key), direction)?;
    Ok(())
}
