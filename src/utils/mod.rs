//! Utilities for logic-engine.
//!
//! Submodules:
//! - `window`: foreground window geometry (no-op on unsupported platforms).

pub mod window;
