use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::time::Duration;

/// Root configuration for the Logic engine.
///
/// This structure is intended to be deserialized from a JSON configuration file.
/// It captures everything the engine needs at startup:
/// - the name of the `target_process` replay is bound to
/// - engine `settings` (per-action delays, poll intervals, force-stop key)
/// - the `logics` themselves (authored elsewhere, read-only here)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate, Default)]
pub struct AppConfig {
    /// Process name (case-insensitive substring) whose window replay is bound to.
    #[serde(default)]
    pub target_process: Option<String>,

    /// Engine tunables.
    #[serde(default)]
    #[validate]
    pub settings: EngineSettings,

    /// Every known Logic, nested-only ones included.
    #[serde(default)]
    #[validate]
    pub logics: Vec<Logic>,
}

/// Opaque, stable Logic identifier.
pub type LogicId = String;

/// Engine tunables. Every field has a default so partial objects are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Pause after every synthesized key press.
    pub key_press_delay_ms: u64,

    /// Pause after every synthesized key release.
    pub key_release_delay_ms: u64,

    /// Pause between moving the cursor and clicking.
    pub mouse_pre_click_delay_ms: u64,

    /// Hardware poll interval while waiting for a click.
    #[validate(minimum = 1)]
    pub wait_click_poll_ms: u64,

    /// How often a running Logic re-checks that the target is still foreground.
    #[validate(minimum = 1)]
    pub guard_poll_ms: u64,

    /// Panic key that aborts a run. Matched on press.
    pub force_stop_key: Option<KeyBinding>,

    /// Log actions instead of touching the OS.
    pub dry_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            key_press_delay_ms: 30,
            key_release_delay_ms: 30,
            mouse_pre_click_delay_ms: 50,
            wait_click_poll_ms: 10,
            guard_poll_ms: 100,
            force_stop_key: None,
            dry_run: false,
        }
    }
}

impl EngineSettings {
    pub fn key_press_delay(&self) -> Duration {
        Duration::from_millis(self.key_press_delay_ms)
    }

    pub fn key_release_delay(&self) -> Duration {
        Duration::from_millis(self.key_release_delay_ms)
    }

    pub fn mouse_pre_click_delay(&self) -> Duration {
        Duration::from_millis(self.mouse_pre_click_delay_ms)
    }

    pub fn wait_click_poll(&self) -> Duration {
        Duration::from_millis(self.wait_click_poll_ms.max(1))
    }

    pub fn guard_poll(&self) -> Duration {
        Duration::from_millis(self.guard_poll_ms.max(1))
    }
}

/// A key identity used for the force-stop key. When `scan_code` is omitted any
/// physical key reporting the same name matches.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: String,
    #[serde(default)]
    pub scan_code: Option<u32>,
}

impl KeyBinding {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            scan_code: None,
        }
    }

    pub fn with_scan_code(mut self, scan_code: u32) -> Self {
        self.scan_code = Some(scan_code);
        self
    }

    pub fn matches(&self, key: &str, scan_code: u32) -> bool {
        self.key.eq_ignore_ascii_case(key) && self.scan_code.is_none_or(|s| s == scan_code)
    }
}

/// Modifier keys held when an event fired.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default, Hash)]
#[serde(default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub win: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        ctrl: false,
        shift: false,
        alt: false,
        win: false,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// The hotkey that launches a non-nested Logic.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Trigger {
    /// Key identity as produced by the input hook (e.g. "A", "Enter", "Num Enter").
    pub key: String,
    /// Scan code; distinguishes physically distinct keys sharing a virtual key.
    pub scan_code: u32,
    #[serde(default)]
    pub virtual_key: u32,
    /// Recorded for display; matching uses `key` and `scan_code` only.
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl Trigger {
    pub fn matches(&self, key: &str, scan_code: u32) -> bool {
        self.key == key && self.scan_code == scan_code
    }
}

/// A named, ordered macro.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Logic {
    pub id: LogicId,

    #[validate(min_length = 1)]
    pub name: String,

    /// Required unless `is_nested`.
    #[serde(default)]
    pub trigger: Option<Trigger>,

    /// Nested-only Logics have no trigger and can only be invoked by another Logic.
    #[serde(default)]
    pub is_nested: bool,

    #[serde(default = "default_repeat_count")]
    #[validate(minimum = 1)]
    pub repeat_count: u32,

    /// Steps; executed by ascending `order`, not by position in this list.
    #[serde(default)]
    pub items: Vec<LogicItemEntry>,
}

impl Logic {
    /// Items sorted by `order` ascending. The sort is stable so equal orders
    /// (rejected by validation, but possible from other stores) keep storage order.
    pub fn ordered_items(&self) -> Vec<LogicItem> {
        let mut entries: Vec<&LogicItemEntry> = self.items.iter().collect();
        entries.sort_by_key(|entry| entry.order);
        entries.into_iter().map(|entry| entry.item.clone()).collect()
    }

    /// True when this Logic may be launched by a released key with this identity.
    pub fn is_triggered_by(&self, key: &str, scan_code: u32) -> bool {
        !self.is_nested
            && self
                .trigger
                .as_ref()
                .is_some_and(|trigger| trigger.matches(key, scan_code))
    }
}

fn default_repeat_count() -> u32 {
    1
}

/// One step of a Logic together with its explicit position.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LogicItemEntry {
    pub order: i64,
    #[serde(flatten)]
    pub item: LogicItem,
}

/// A single replayable action.
///
/// The set is closed: the engine matches exhaustively, so adding a kind means
/// updating dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicItem {
    /// Press or release one physical key.
    KeyInput {
        key: String,
        scan_code: u32,
        #[serde(default)]
        virtual_key: u32,
        action: KeyAction,
    },

    /// Click at a position given as fractions of the target's client area.
    MouseInput {
        button: MouseButton,
        x_ratio: f64,
        y_ratio: f64,
    },

    /// Sleep for a fixed duration.
    Delay { duration_seconds: f64 },

    /// Block until the user clicks the primary button or presses Space.
    WaitClick,

    /// Paste text through the clipboard.
    WriteText { text: String },

    /// Run another Logic, `repeat_count` times over.
    NestedLogic {
        logic_id: LogicId,
        #[serde(default = "default_repeat_count")]
        repeat_count: u32,
    },
}

impl LogicItem {
    /// Stable, snake_case name of the item kind (used in logs and errors).
    pub fn kind(&self) -> &'static str {
        match self {
            LogicItem::KeyInput { .. } => "key_input",
            LogicItem::MouseInput { .. } => "mouse_input",
            LogicItem::Delay { .. } => "delay",
            LogicItem::WaitClick => "wait_click",
            LogicItem::WriteText { .. } => "write_text",
            LogicItem::NestedLogic { .. } => "nested_logic",
        }
    }

    /// Human-readable one-liner for step logs.
    pub fn describe(&self) -> String {
        match self {
            LogicItem::KeyInput { key, action, .. } => format!("{key} {action}"),
            LogicItem::MouseInput {
                button,
                x_ratio,
                y_ratio,
            } => format!("{button:?} click at ({x_ratio:.3}, {y_ratio:.3})"),
            LogicItem::Delay { duration_seconds } => format!("delay {duration_seconds}s"),
            LogicItem::WaitClick => "wait for click".to_string(),
            LogicItem::WriteText { text } => format!("write {} chars", text.chars().count()),
            LogicItem::NestedLogic {
                logic_id,
                repeat_count,
            } => format!("run logic '{logic_id}' x{repeat_count}"),
        }
    }
}

/// Direction of a key action.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Press,
    Release,
}

impl std::fmt::Display for KeyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyAction::Press => f.write_str("press"),
            KeyAction::Release => f.write_str("release"),
        }
    }
}

/// Mouse button enumeration.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_entry_flattens_tag() {
        let entry: LogicItemEntry = serde_json::from_value(json!({
            "order": 3,
            "type": "key_input",
            "key": "A",
            "scan_code": 30,
            "virtual_key": 65,
            "action": "press"
        }))
        .unwrap();
        assert_eq!(entry.order, 3);
        assert_eq!(entry.item.kind(), "key_input");

        let wait: LogicItemEntry =
            serde_json::from_value(json!({"order": 1, "type": "wait_click"})).unwrap();
        assert_eq!(wait.item, LogicItem::WaitClick);
    }

    #[test]
    fn test_ordered_items_follow_order_field() {
        let logic: Logic = serde_json::from_value(json!({
            "id": "l1",
            "name": "ordering",
            "trigger": {"key": "F1", "scan_code": 59},
            "items": [
                {"order": 30, "type": "delay", "duration_seconds": 0.3},
                {"order": -5, "type": "delay", "duration_seconds": 0.1},
                {"order": 10, "type": "delay", "duration_seconds": 0.2}
            ]
        }))
        .unwrap();
        assert_eq!(logic.repeat_count, 1);

        let durations: Vec<f64> = logic
            .ordered_items()
            .into_iter()
            .map(|item| match item {
                LogicItem::Delay { duration_seconds } => duration_seconds,
                other => panic!("unexpected item {other:?}"),
            })
            .collect();
        assert_eq!(durations, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_nested_logic_never_triggered() {
        let trigger = Trigger {
            key: "A".into(),
            scan_code: 30,
            virtual_key: 0x41,
            modifiers: Modifiers::NONE,
        };
        let mut logic = Logic {
            id: "n".into(),
            name: "nested".into(),
            trigger: Some(trigger),
            is_nested: true,
            repeat_count: 1,
            items: vec![],
        };
        assert!(!logic.is_triggered_by("A", 30));
        logic.is_nested = false;
        assert!(logic.is_triggered_by("A", 30));
        assert!(!logic.is_triggered_by("A", 31));
    }

    #[test]
    fn test_key_binding_matching() {
        let any_f12 = KeyBinding::new("F12");
        assert!(any_f12.matches("f12", 88));
        assert!(!any_f12.matches("F11", 87));

        let exact = KeyBinding::new("Left Ctrl").with_scan_code(29);
        assert!(exact.matches("Left Ctrl", 29));
        assert!(!exact.matches("Left Ctrl", 30));
    }

    #[test]
    fn test_settings_defaults_for_partial_object() {
        let settings: EngineSettings =
            serde_json::from_value(json!({"key_press_delay_ms": 5})).unwrap();
        assert_eq!(settings.key_press_delay(), Duration::from_millis(5));
        assert_eq!(settings.key_release_delay_ms, 30);
        assert!(settings.force_stop_key.is_none());
    }
}
