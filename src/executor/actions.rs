use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use enigo::Keyboard as _;
use enigo::Mouse as _;
use enigo::{Button as EButton, Coordinate, Direction, Enigo, Key, Settings};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{EngineSettings, KeyAction, MouseButton as CMouseButton};
use crate::error::EngineError;
use crate::guard::ProcessHandle;
use crate::input::keys::{KeyStroke, VK_LBUTTON, VK_SPACE};
use crate::input::state::{ClickWatcher, KeyStateProbe, held_keys};
use crate::input::synth;
use crate::utils::window::{self, ClientArea};

/// OS-facing side of the executors.
pub trait InputBackend: Send + Sync {
    fn key(&self, stroke: &KeyStroke, action: KeyAction) -> Result<()>;
    fn cursor_position(&self) -> Result<(i32, i32)>;
    fn move_cursor(&self, x: i32, y: i32) -> Result<()>;
    fn click(&self, button: CMouseButton) -> Result<()>;
    fn set_clipboard(&self, text: &str) -> Result<()>;
    /// Ctrl+V.
    fn paste(&self) -> Result<()>;
    /// Client area of the foreground window if it belongs to `pid`.
    fn client_area(&self, pid: u32) -> Result<Option<ClientArea>>;
}

/// Enigo for the mouse and Ctrl+V, scan-code `SendInput` for recorded keys,
/// arboard for the clipboard.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnigoBackend;

impl EnigoBackend {
    fn enigo() -> Result<Enigo> {
        trace!(target: "logic_engine::actions", "Initializing Enigo");
        Enigo::new(&Settings::default()).context("Failed to initialize Enigo")
    }
}

impl InputBackend for EnigoBackend {
    fn key(&self, stroke: &KeyStroke, action: KeyAction) -> Result<()> {
        synth::send_key(stroke, action)
            .with_context(|| format!("Failed to send {}", stroke.describe(action)))
    }

    fn cursor_position(&self) -> Result<(i32, i32)> {
        Ok(Self::enigo()?.location()?)
    }

    fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
        Self::enigo()?.move_mouse(x, y, Coordinate::Abs)?;
        Ok(())
    }

    fn click(&self, button: CMouseButton) -> Result<()> {
        Self::enigo()?.button(map_mouse_button(button), Direction::Click)?;
        Ok(())
    }

    fn set_clipboard(&self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("Failed to open clipboard")?;
        clipboard
            .set_text(text)
            .context("Failed to set clipboard text")?;
        Ok(())
    }

    fn paste(&self) -> Result<()> {
        let mut enigo = Self::enigo()?;
        enigo.key(Key::Control, Direction::Press)?;
        let pressed = enigo.key(Key::Unicode('v'), Direction::Click);
        // Always let go of Ctrl, even if the V click failed
        enigo.key(Key::Control, Direction::Release)?;
        pressed?;
        Ok(())
    }

    fn client_area(&self, pid: u32) -> Result<Option<ClientArea>> {
        window::foreground_client_area(pid)
    }
}

/// How a `WaitClick` ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Clicked,
    Cancelled,
}

/// Runs the leaf actions of a Logic with optional dry-run mode.
/// In dry-run mode, actions are only logged and no real input is simulated.
pub struct ActionExecutor {
    dry_run: bool,
    backend: Arc<dyn InputBackend>,
    keys: Arc<dyn KeyStateProbe>,
    settings: EngineSettings,
}

impl ActionExecutor {
    pub fn new(
        settings: EngineSettings,
        backend: Arc<dyn InputBackend>,
        keys: Arc<dyn KeyStateProbe>,
    ) -> Self {
        Self {
            dry_run: settings.dry_run,
            backend,
            keys,
            settings,
        }
    }

    /// Returns whether the executor is currently in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Press or release one key, then wait the per-direction delay.
    pub async fn key_input(&self, stroke: &KeyStroke, action: KeyAction) -> crate::Result<()> {
        let delay = match action {
            KeyAction::Press => self.settings.key_press_delay(),
            KeyAction::Release => self.settings.key_release_delay(),
        };
        if self.dry_run {
            info!(
                target: "logic_engine::actions",
                key = %stroke.key, scan_code = stroke.scan_code, %action,
                "DRY-RUN key_input"
            );
            return Ok(());
        }
        trace!(target: "logic_engine::actions", key = %stroke.key, scan_code = stroke.scan_code, %action, "key_input");
        self.backend
            .key(stroke, action)
            .map_err(|err| EngineError::action_failed("key_input", &err))?;
        sleep(delay).await;
        Ok(())
    }

    /// Click at a point given as ratios of the target's client area, then put
    /// the cursor back where it was.
    pub async fn mouse_input(
        &self,
        target: Option<&ProcessHandle>,
        button: CMouseButton,
        x_ratio: f64,
        y_ratio: f64,
    ) -> crate::Result<()> {
        let target = target.ok_or(EngineError::NoTargetProcess)?;
        if self.dry_run {
            info!(
                target: "logic_engine::actions",
                pid = target.pid, ?button, x_ratio, y_ratio,
                "DRY-RUN mouse_input"
            );
            return Ok(());
        }
        let fail = |err: anyhow::Error| EngineError::action_failed("mouse_input", &err);

        let area = self
            .backend
            .client_area(target.pid)
            .map_err(fail)?
            .ok_or(EngineError::GuardViolation)?;
        let (x, y) = area.to_screen(x_ratio, y_ratio);
        trace!(target: "logic_engine::actions", ?button, x, y, scale = area.scale, "mouse_input");

        let original = self.backend.cursor_position().map_err(fail)?;
        self.backend.move_cursor(x, y).map_err(fail)?;
        sleep(self.settings.mouse_pre_click_delay()).await;
        let clicked = self.backend.click(button);
        let restored = self.backend.move_cursor(original.0, original.1);
        clicked.map_err(fail)?;
        restored.map_err(fail)?;
        Ok(())
    }

    /// Sleep for the full duration; a stop request does not cut it short.
    pub async fn delay(&self, duration_seconds: f64) -> crate::Result<()> {
        let duration = Duration::try_from_secs_f64(duration_seconds)
            .map_err(|err| EngineError::action_failed("delay", &anyhow::Error::new(err)))?;
        if self.dry_run {
            info!(target: "logic_engine::actions", ?duration, "DRY-RUN delay");
            return Ok(());
        }
        trace!(target: "logic_engine::actions", ?duration, "delay");
        sleep(duration).await;
        Ok(())
    }

    /// Wait for a full click of the primary mouse button or Space.
    pub async fn wait_click(&self, cancel: &CancellationToken) -> WaitOutcome {
        if self.dry_run {
            info!(target: "logic_engine::actions", "DRY-RUN wait_click");
            return WaitOutcome::Clicked;
        }
        let mut watcher = ClickWatcher::new([VK_LBUTTON, VK_SPACE]);
        let mut ticker = interval(self.settings.wait_click_poll());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(target: "logic_engine::actions", "wait_click: waiting");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: "logic_engine::actions", "wait_click: cancelled");
                    return WaitOutcome::Cancelled;
                }
                _ = ticker.tick() => {
                    if watcher.poll(self.keys.as_ref()) {
                        debug!(target: "logic_engine::actions", "wait_click: clicked");
                        return WaitOutcome::Clicked;
                    }
                }
            }
        }
    }

    /// Paste `text` through the clipboard.
    pub async fn write_text(&self, text: &str) -> crate::Result<()> {
        if self.dry_run {
            info!(target: "logic_engine::actions", chars = text.chars().count(), "DRY-RUN write_text");
            return Ok(());
        }
        let fail = |err: anyhow::Error| EngineError::action_failed("write_text", &err);
        trace!(target: "logic_engine::actions", chars = text.chars().count(), "write_text");
        self.backend.set_clipboard(text).map_err(fail)?;
        self.backend.paste().map_err(fail)?;
        sleep(self.settings.key_release_delay()).await;
        Ok(())
    }

    /// Release every keyboard key that reads as held down, including keys
    /// this engine never pressed. Returns the virtual keys released.
    pub fn release_held_keys(&self) -> Vec<u32> {
        let held = held_keys(self.keys.as_ref());
        if held.is_empty() {
            return held;
        }
        if self.dry_run {
            info!(target: "logic_engine::actions", ?held, "DRY-RUN release_held_keys");
            return held;
        }
        for vk in &held {
            let stroke = KeyStroke::from_virtual_key(*vk);
            if let Err(err) = self.backend.key(&stroke, KeyAction::Release) {
                warn!(
                    target: "logic_engine::actions",
                    vk = format_args!("0x{vk:02X}"),
                    error = %format!("{err:#}"),
                    "Failed to release held key"
                );
            }
        }
        info!(target: "logic_engine::actions", released = held.len(), "Released held keys");
        held
    }

    /// Release one key pressed by a step whose run already ended.
    pub fn release_key(&self, stroke: &KeyStroke) {
        if self.dry_run {
            return;
        }
        if let Err(err) = self.backend.key(stroke, KeyAction::Release) {
            warn!(
                target: "logic_engine::actions",
                key = %stroke.key,
                error = %format!("{err:#}"),
                "Failed to release key"
            );
        }
    }
}

fn map_mouse_button(btn: CMouseButton) -> EButton {
    match btn {
        CMouseButton::Left => EButton::Left,
        CMouseButton::Middle => EButton::Middle,
        CMouseButton::Right => EButton::Right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        down: Mutex<HashSet<u32>>,
        area: Option<ClientArea>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl InputBackend for Recorder {
        fn key(&self, stroke: &KeyStroke, action: KeyAction) -> Result<()> {
            let mut down = self.down.lock().unwrap();
            match action {
                KeyAction::Press => down.insert(stroke.virtual_key),
                KeyAction::Release => down.remove(&stroke.virtual_key),
            };
            self.push(format!("key {} {action}", stroke.key));
            Ok(())
        }
        fn cursor_position(&self) -> Result<(i32, i32)> {
            Ok((5, 6))
        }
        fn move_cursor(&self, x: i32, y: i32) -> Result<()> {
            self.push(format!("move {x},{y}"));
            Ok(())
        }
        fn click(&self, button: CMouseButton) -> Result<()> {
            self.push(format!("click {button:?}"));
            Ok(())
        }
        fn set_clipboard(&self, text: &str) -> Result<()> {
            self.push(format!("clipboard {text}"));
            Ok(())
        }
        fn paste(&self) -> Result<()> {
            anyhow::bail!("paste blocked")
        }
        fn client_area(&self, _pid: u32) -> Result<Option<ClientArea>> {
            Ok(self.area)
        }
    }

    impl KeyStateProbe for Recorder {
        fn is_down(&self, virtual_key: u32) -> bool {
            self.down.lock().unwrap().contains(&virtual_key)
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            key_press_delay_ms: 0,
            key_release_delay_ms: 0,
            mouse_pre_click_delay_ms: 0,
            wait_click_poll_ms: 1,
            ..EngineSettings::default()
        }
    }

    fn executor(recorder: &Arc<Recorder>, dry_run: bool) -> ActionExecutor {
        let mut settings = settings();
        settings.dry_run = dry_run;
        ActionExecutor::new(settings, recorder.clone(), recorder.clone())
    }

    #[tokio::test]
    async fn test_mouse_click_restores_cursor() {
        let recorder = Arc::new(Recorder {
            area: Some(ClientArea {
                left: 0,
                top: 0,
                width: 101,
                height: 201,
                scale: 1.0,
            }),
            ..Recorder::default()
        });
        let exec = executor(&recorder, false);
        let target = ProcessHandle::new(1, "game.exe");
        exec.mouse_input(Some(&target), CMouseButton::Left, 0.5, 0.25)
            .await
            .unwrap();
        assert_eq!(recorder.calls(), vec!["move 50,50", "click Left", "move 5,6"]);
    }

    #[tokio::test]
    async fn test_mouse_needs_target_and_foreground() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(&recorder, false);
        let err = exec
            .mouse_input(None, CMouseButton::Left, 0.5, 0.5)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::NoTargetProcess);

        let target = ProcessHandle::new(1, "game.exe");
        let err = exec
            .mouse_input(Some(&target), CMouseButton::Left, 0.5, 0.5)
            .await
            .unwrap_err();
        assert!(err.is_guard_violation());
    }

    #[tokio::test]
    async fn test_write_text_failure_is_action_failed() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(&recorder, false);
        let err = exec.write_text("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::ActionFailed { kind: "write_text", .. }));
        assert_eq!(recorder.calls(), vec!["clipboard hello"]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(&recorder, true);
        let stroke = KeyStroke::new("A", 30, 0x41);
        exec.key_input(&stroke, KeyAction::Press).await.unwrap();
        exec.write_text("x").await.unwrap();
        exec.delay(10.0).await.unwrap();
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_release_held_keys() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(&recorder, false);
        exec.key_input(&KeyStroke::new("A", 30, 0x41), KeyAction::Press)
            .await
            .unwrap();
        recorder.down.lock().unwrap().insert(0xA2);

        let released = exec.release_held_keys();
        assert_eq!(released, vec![0x41, 0xA2]);
        assert!(recorder.down.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_click_cancelled() {
        let recorder = Arc::new(Recorder::default());
        let exec = executor(&recorder, false);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        assert_eq!(exec.wait_click(&token).await, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_click_space_press_release() {
        let recorder = Arc::new(Recorder::default());
        let exec = Arc::new(executor(&recorder, false));
        let token = CancellationToken::new();

        let waiter = {
            let exec = Arc::clone(&exec);
            let token = token.clone();
            tokio::spawn(async move { exec.wait_click(&token).await })
        };
        sleep(Duration::from_millis(20)).await;
        recorder.down.lock().unwrap().insert(VK_SPACE);
        sleep(Duration::from_millis(20)).await;
        recorder.down.lock().unwrap().remove(&VK_SPACE);

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Clicked);
    }
}
