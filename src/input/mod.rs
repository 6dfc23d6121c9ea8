//! Keyboard input plumbing: the OS hook, key normalization, hardware key
//! state and scan-code synthesis.

pub mod hook;
pub mod keys;
pub mod state;
pub mod synth;

pub use hook::{HookHandle, HookSource, ManualHook, SystemHook};
pub use keys::{KeyEvent, KeyStroke, KeyTransition, RawKeyEvent, normalize};
pub use state::{ClickWatcher, KeyStateProbe, SystemKeyState, held_keys};
