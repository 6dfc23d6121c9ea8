//! Configuration module.
//!
//! This module wires together the Logic data model and the loading/validation
//! helpers. Import from here for a convenient, stable API.
//!
//! Example:
//! use logic_engine::config::{AppConfig, load_from_path};
//!
//! let cfg = load_from_path("config/logics.json")?;

pub mod loader;
pub mod models;

// Re-export core data models
pub use models::{
    AppConfig, EngineSettings, KeyAction, KeyBinding, Logic, LogicId, LogicItem, LogicItemEntry,
    Modifiers, MouseButton, Trigger,
};

// Re-export loader utilities
pub use loader::{
    generate_schema, load_from_path, load_from_path_async, load_from_reader, load_from_str,
    validate_config, write_schema_to_writer,
};
