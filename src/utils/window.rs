use anyhow::Result;
use serde::Serialize;
use tracing::{debug, trace};

/// Screen-space client rectangle of a window.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ClientArea {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    /// DPI scale of the window (1.0 at 96 DPI). Informational only: the
    /// rectangle is already in the caller's coordinate space.
    pub scale: f64,
}

impl ClientArea {
    /// Map ratios in `[0, 1]` to an absolute screen point. The far edge maps
    /// to the last pixel inside the area.
    pub fn to_screen(&self, x_ratio: f64, y_ratio: f64) -> (i32, i32) {
        let span = |len: i32, ratio: f64| {
            let max = f64::from((len - 1).max(0));
            (ratio.clamp(0.0, 1.0) * max).round() as i32
        };
        (
            self.left + span(self.width, x_ratio),
            self.top + span(self.height, y_ratio),
        )
    }
}

/// Client area of the foreground window, provided it belongs to `pid`.
///
/// Returns:
/// - Ok(Some(area)) when the foreground window is owned by `pid`.
/// - Ok(None) when another process is in front (or on unsupported platforms).
/// - Err(_) when the window geometry cannot be queried.
pub fn foreground_client_area(pid: u32) -> Result<Option<ClientArea>> {
    let area = foreground_client_area_impl(pid)?;
    trace!(target: "logic_engine::window", pid, ?area, "foreground_client_area");
    Ok(area)
}

#[cfg(windows)]
fn foreground_client_area_impl(pid: u32) -> Result<Option<ClientArea>> {
    use anyhow::{Context, bail};
    use windows::Win32::Foundation::{POINT, RECT};
    use windows::Win32::Graphics::Gdi::ClientToScreen;
    use windows::Win32::UI::HiDpi::GetDpiForWindow;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetClientRect, GetForegroundWindow, GetWindowThreadProcessId,
    };

    unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.is_invalid() {
            return Ok(None);
        }
        let mut owner = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut owner as *mut u32));
        if owner != pid {
            debug!(target: "logic_engine::window", pid, owner, "Foreground window belongs to another process");
            return Ok(None);
        }

        let mut rect = RECT::default();
        GetClientRect(hwnd, &mut rect).context("GetClientRect failed")?;
        let mut origin = POINT { x: 0, y: 0 };
        if !ClientToScreen(hwnd, &mut origin).as_bool() {
            bail!("ClientToScreen failed");
        }
        let dpi = GetDpiForWindow(hwnd);
        let scale = if dpi == 0 { 1.0 } else { f64::from(dpi) / 96.0 };

        Ok(Some(ClientArea {
            left: origin.x,
            top: origin.y,
            width: rect.right - rect.left,
            height: rect.bottom - rect.top,
            scale,
        }))
    }
}

#[cfg(not(windows))]
fn foreground_client_area_impl(pid: u32) -> Result<Option<ClientArea>> {
    debug!(
        target: "logic_engine::window",
        pid,
        "foreground_client_area is not supported on this platform; returning None"
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_mapping() {
        let area = ClientArea {
            left: 100,
            top: 50,
            width: 801,
            height: 601,
            scale: 1.5,
        };
        assert_eq!(area.to_screen(0.0, 0.0), (100, 50));
        assert_eq!(area.to_screen(0.5, 0.5), (500, 350));
        assert_eq!(area.to_screen(1.0, 1.0), (900, 650));
        assert_eq!(area.to_screen(2.0, -1.0), (900, 50));
    }

    #[test]
    fn test_empty_area_maps_to_origin() {
        let area = ClientArea {
            left: 10,
            top: 20,
            width: 0,
            height: 0,
            scale: 1.0,
        };
        assert_eq!(area.to_screen(0.7, 0.3), (10, 20));
    }
}
