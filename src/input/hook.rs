//! Keyboard hook sources.
//!
//! A [`HookSource`] forwards every key transition to the engine through an
//! unbounded channel. The callback side only translates and sends; all
//! matching happens on the receiving task.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

use super::keys::KeyEvent;

/// Installs a system-wide keyboard hook.
pub trait HookSource: Send + Sync {
    fn install(&self, events: UnboundedSender<KeyEvent>) -> Result<HookHandle>;
}

/// Keeps a hook installed. Dropping it uninstalls the hook.
pub struct HookHandle {
    uninstall: Option<Box<dyn FnOnce() + Send>>,
}

impl HookHandle {
    pub fn new(uninstall: impl FnOnce() + Send + 'static) -> Self {
        Self {
            uninstall: Some(Box::new(uninstall)),
        }
    }
}

impl Drop for HookHandle {
    fn drop(&mut self) {
        if let Some(uninstall) = self.uninstall.take() {
            uninstall();
        }
    }
}

impl std::fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookHandle")
            .field("installed", &self.uninstall.is_some())
            .finish()
    }
}

/// Hook driven by the caller: events passed to [`ManualHook::emit`] reach the
/// engine as if the OS had reported them.
#[derive(Clone, Default)]
pub struct ManualHook {
    inner: Arc<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    sender: Mutex<Option<UnboundedSender<KeyEvent>>>,
    installs: AtomicUsize,
    fail_next: AtomicBool,
}

impl ManualHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward an event. Returns false when no hook is installed.
    pub fn emit(&self, event: KeyEvent) -> bool {
        match self.inner.sender.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|tx| tx.send(event).is_ok()),
            Err(_) => false,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.inner
            .sender
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Number of successful installs so far.
    pub fn install_count(&self) -> usize {
        self.inner.installs.load(Ordering::SeqCst)
    }

    /// Make the next install fail.
    pub fn fail_next_install(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }
}

impl HookSource for ManualHook {
    fn install(&self, events: UnboundedSender<KeyEvent>) -> Result<HookHandle> {
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::hook_install("manual hook refused install"));
        }
        let mut slot = self
            .inner
            .sender
            .lock()
            .map_err(|_| EngineError::hook_install("manual hook state poisoned"))?;
        *slot = Some(events);
        self.inner.installs.fetch_add(1, Ordering::SeqCst);
        debug!(target: "logic_engine::hook", "Manual hook installed");

        let inner = Arc::clone(&self.inner);
        Ok(HookHandle::new(move || {
            if let Ok(mut slot) = inner.sender.lock() {
                slot.take();
            }
            debug!(target: "logic_engine::hook", "Manual hook removed");
        }))
    }
}

/// The OS low-level keyboard hook (`WH_KEYBOARD_LL`), run on its own
/// message-loop thread. Only one can be installed per process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHook;

#[cfg(windows)]
mod system {
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::thread;

    use tokio::sync::mpsc::UnboundedSender;
    use tracing::{error, warn};
    use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, GetMessageW, HC_ACTION, KBDLLHOOKSTRUCT, MSG, PostThreadMessageW,
        SetWindowsHookExW, UnhookWindowsHookEx, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_QUIT,
        WM_SYSKEYDOWN, WM_SYSKEYUP,
    };
    use windows::core::PCWSTR;

    use crate::error::{EngineError, Result};
    use crate::input::keys::{KeyEvent, KeyTransition, RawKeyEvent, normalize};
    use crate::input::state::{SystemKeyState, current_modifiers};

    static HOOK_SENDER: Mutex<Option<UnboundedSender<KeyEvent>>> = Mutex::new(None);

    pub(super) fn install(events: UnboundedSender<KeyEvent>) -> Result<(u32, thread::JoinHandle<()>)> {
        {
            let mut slot = HOOK_SENDER
                .lock()
                .map_err(|_| EngineError::hook_install("hook state poisoned"))?;
            if slot.is_some() {
                return Err(EngineError::hook_install("a keyboard hook is already installed"));
            }
            *slot = Some(events);
        }

        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<u32, String>>();
        let spawned = thread::Builder::new()
            .name("keyboard-hook".into())
            .spawn(move || run_message_loop(ready_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                clear_sender();
                return Err(EngineError::hook_install(err));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => Ok((thread_id, thread)),
            Ok(Err(reason)) => {
                let _ = thread.join();
                clear_sender();
                Err(EngineError::HookInstall(reason))
            }
            Err(_) => {
                let _ = thread.join();
                clear_sender();
                Err(EngineError::hook_install("hook thread exited before reporting"))
            }
        }
    }

    pub(super) fn uninstall(thread_id: u32, thread: thread::JoinHandle<()>) {
        if let Err(err) = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            warn!(target: "logic_engine::hook", error = %err, "Failed to post WM_QUIT to hook thread");
        }
        if thread.join().is_err() {
            error!(target: "logic_engine::hook", "Hook thread panicked");
        }
        clear_sender();
    }

    fn clear_sender() {
        if let Ok(mut slot) = HOOK_SENDER.lock() {
            slot.take();
        }
    }

    fn run_message_loop(ready: mpsc::Sender<std::result::Result<u32, String>>) {
        unsafe {
            let thread_id = GetCurrentThreadId();
            let module = match GetModuleHandleW(PCWSTR::null()) {
                Ok(module) => module,
                Err(err) => {
                    let _ = ready.send(Err(format!("GetModuleHandleW failed: {err}")));
                    return;
                }
            };
            let hook = match SetWindowsHookExW(
                WH_KEYBOARD_LL,
                Some(keyboard_proc),
                Some(HINSTANCE(module.0)),
                0,
            ) {
                Ok(hook) => hook,
                Err(err) => {
                    let _ = ready.send(Err(format!("SetWindowsHookExW failed: {err}")));
                    return;
                }
            };
            let _ = ready.send(Ok(thread_id));

            // 0 means WM_QUIT, -1 an error
            let mut msg = MSG::default();
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {}

            if let Err(err) = UnhookWindowsHookEx(hook) {
                warn!(target: "logic_engine::hook", error = %err, "UnhookWindowsHookEx failed");
            }
        }
    }

    unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if code == HC_ACTION as i32 {
            let data = unsafe { &*(lparam.0 as *const KBDLLHOOKSTRUCT) };
            let transition = match wparam.0 as u32 {
                WM_KEYDOWN | WM_SYSKEYDOWN => Some(KeyTransition::Pressed),
                WM_KEYUP | WM_SYSKEYUP => Some(KeyTransition::Released),
                _ => None,
            };
            if let Some(transition) = transition {
                let raw = RawKeyEvent {
                    virtual_key: data.vkCode,
                    scan_code: data.scanCode,
                    flags: data.flags.0,
                    transition,
                    is_system: matches!(wparam.0 as u32, WM_SYSKEYDOWN | WM_SYSKEYUP),
                };
                forward(&raw);
            }
        }
        unsafe { CallNextHookEx(None, code, wparam, lparam) }
    }

    fn forward(raw: &RawKeyEvent) {
        if let Ok(slot) = HOOK_SENDER.lock() {
            if let Some(tx) = slot.as_ref() {
                let event = normalize(raw, current_modifiers(&SystemKeyState));
                let _ = tx.send(event);
            }
        }
    }
}

impl HookSource for SystemHook {
    #[cfg(windows)]
    fn install(&self, events: UnboundedSender<KeyEvent>) -> Result<HookHandle> {
        let (thread_id, thread) = system::install(events)?;
        info!(target: "logic_engine::hook", thread_id, "Keyboard hook installed");
        Ok(HookHandle::new(move || {
            system::uninstall(thread_id, thread);
            info!(target: "logic_engine::hook", "Keyboard hook removed");
        }))
    }

    #[cfg(not(windows))]
    fn install(&self, _events: UnboundedSender<KeyEvent>) -> Result<HookHandle> {
        info!(target: "logic_engine::hook", "Low-level keyboard hook unavailable on this platform");
        Err(EngineError::unsupported_platform(
            "low-level keyboard hook requires Windows",
        ))
    }
}
