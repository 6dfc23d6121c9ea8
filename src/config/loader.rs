use anyhow::{Context, Result, anyhow, bail, ensure};
use schemars::{Schema, schema_for};
use serde_valid::Validate;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use super::models::{AppConfig, Logic, LogicItem};

/// Load configuration from a string slice.
pub fn load_from_str(s: &str) -> Result<AppConfig> {
    let cfg: AppConfig =
        serde_json::from_str(s).context("Failed to parse JSON config string into AppConfig")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Load configuration from any reader (e.g., a file).
pub fn load_from_reader<R: Read>(reader: R) -> Result<AppConfig> {
    let cfg: AppConfig =
        serde_json::from_reader(reader).context("Failed to parse JSON config from reader")?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Load configuration from a file path synchronously.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open config file {}", path_ref.display()))?;
    let cfg = load_from_reader(file)
        .with_context(|| format!("Invalid config file {}", path_ref.display()))?;
    debug!(logics = cfg.logics.len(), "Loaded config from {}", path_ref.display());
    Ok(cfg)
}

/// Load configuration from a file path asynchronously (Tokio).
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    use tokio::fs;
    let path_ref = path.as_ref();
    let bytes = fs::read(path_ref)
        .await
        .with_context(|| format!("Failed to read config file {}", path_ref.display()))?;
    let cfg: AppConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse JSON config from {}", path_ref.display()))?;
    validate_config(&cfg)?;
    debug!(logics = cfg.logics.len(), "Loaded config from {}", path_ref.display());
    Ok(cfg)
}

/// Generate the JSON Schema for the config model (for external validation or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(AppConfig)
}

/// Write the JSON Schema for the config model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Field constraints first, then the cross-references a schema cannot express:
/// - ids are unique, names unique among triggerable Logics
/// - triggerable Logics have a trigger, nested-only Logics do not
/// - `order` is unique within a Logic
/// - nested-logic items point at known ids
/// - the force-stop key does not shadow any trigger
pub fn validate_config(cfg: &AppConfig) -> Result<()> {
    cfg.validate()
        .map_err(|errors| anyhow!("Config failed field validation: {errors}"))?;

    let mut ids = BTreeSet::new();
    let mut names = BTreeSet::new();
    for logic in &cfg.logics {
        ensure!(ids.insert(logic.id.as_str()), "Duplicate logic id '{}'", logic.id);
        if !logic.is_nested {
            ensure!(
                names.insert(logic.name.as_str()),
                "Duplicate logic name '{}'",
                logic.name
            );
        }
    }

    for logic in &cfg.logics {
        validate_logic(logic, &ids)
            .with_context(|| format!("Invalid logic '{}' ({})", logic.name, logic.id))?;
    }

    if let Some(binding) = &cfg.settings.force_stop_key {
        for logic in cfg.logics.iter().filter(|l| !l.is_nested) {
            if let Some(trigger) = &logic.trigger {
                if binding.matches(&trigger.key, trigger.scan_code) {
                    bail!(
                        "Force-stop key '{}' collides with the trigger of logic '{}'",
                        binding.key,
                        logic.name
                    );
                }
            }
        }
    }

    Ok(())
}

fn validate_logic(logic: &Logic, known_ids: &BTreeSet<&str>) -> Result<()> {
    match (&logic.trigger, logic.is_nested) {
        (None, false) => bail!("A non-nested logic needs a trigger"),
        (Some(_), true) => bail!("A nested logic cannot have a trigger"),
        _ => {}
    }

    let mut orders = BTreeSet::new();
    for entry in &logic.items {
        ensure!(
            orders.insert(entry.order),
            "Duplicate item order {}",
            entry.order
        );
        validate_item(&entry.item, known_ids)
            .with_context(|| format!("Invalid item at order {}", entry.order))?;
    }
    Ok(())
}

fn validate_item(item: &LogicItem, known_ids: &BTreeSet<&str>) -> Result<()> {
    match item {
        LogicItem::MouseInput {
            x_ratio, y_ratio, ..
        } => {
            for ratio in [x_ratio, y_ratio] {
                ensure!(
                    ratio.is_finite() && (0.0..=1.0).contains(ratio),
                    "Mouse ratio {ratio} is outside [0, 1]"
                );
            }
        }
        LogicItem::Delay { duration_seconds } => {
            ensure!(
                duration_seconds.is_finite() && *duration_seconds >= 0.0,
                "Delay {duration_seconds} must be a finite, non-negative number of seconds"
            );
        }
        LogicItem::NestedLogic {
            logic_id,
            repeat_count,
        } => {
            ensure!(*repeat_count >= 1, "Nested repeat_count must be at least 1");
            if !known_ids.contains(logic_id.as_str()) {
                bail!("Nested logic '{}' was not found in `logics`", logic_id);
            }
        }
        // Leaf actions: nothing to validate
        LogicItem::KeyInput { .. } | LogicItem::WaitClick | LogicItem::WriteText { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    fn base_config() -> serde_json::Value {
        json!({
            "target_process": "game.exe",
            "settings": {"force_stop_key": {"key": "F12"}},
            "logics": [
                {
                    "id": "l1",
                    "name": "combo",
                    "trigger": {"key": "Enter", "scan_code": 28, "virtual_key": 13},
                    "repeat_count": 2,
                    "items": [
                        {"order": 1, "type": "key_input", "key": "A", "scan_code": 30, "virtual_key": 65, "action": "press"},
                        {"order": 2, "type": "key_input", "key": "A", "scan_code": 30, "virtual_key": 65, "action": "release"},
                        {"order": 3, "type": "nested_logic", "logic_id": "n1"}
                    ]
                },
                {
                    "id": "n1",
                    "name": "pause",
                    "is_nested": true,
                    "items": [{"order": 1, "type": "delay", "duration_seconds": 0.01}]
                }
            ]
        })
    }

    #[test]
    fn test_valid_config_loads() {
        let cfg = load_from_str(&base_config().to_string()).unwrap();
        assert_eq!(cfg.logics.len(), 2);
        assert_eq!(cfg.target_process.as_deref(), Some("game.exe"));
        assert_eq!(cfg.settings.key_press_delay_ms, 30);
    }

    #[test]
    fn test_missing_nested_reference_is_rejected() {
        let mut v = base_config();
        v["logics"][0]["items"][2]["logic_id"] = json!("ghost");
        let err = load_from_str(&v.to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("'ghost' was not found"));
    }

    #[test]
    fn test_trigger_rules() {
        let mut v = base_config();
        v["logics"][0]["trigger"] = serde_json::Value::Null;
        assert!(load_from_str(&v.to_string()).is_err());

        let mut v = base_config();
        v["logics"][1]["trigger"] = json!({"key": "B", "scan_code": 48});
        let err = load_from_str(&v.to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("cannot have a trigger"));
    }

    #[test]
    fn test_duplicate_orders_and_names() {
        let mut v = base_config();
        v["logics"][0]["items"][1]["order"] = json!(1);
        assert!(load_from_str(&v.to_string()).is_err());

        let mut v = base_config();
        v["logics"][1]["is_nested"] = json!(false);
        v["logics"][1]["name"] = json!("combo");
        v["logics"][1]["trigger"] = json!({"key": "B", "scan_code": 48});
        let err = load_from_str(&v.to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("Duplicate logic name"));
    }

    #[test]
    fn test_field_constraints() {
        let mut v = base_config();
        v["logics"][0]["repeat_count"] = json!(0);
        assert!(load_from_str(&v.to_string()).is_err());

        let mut v = base_config();
        v["logics"][1]["items"][0]["duration_seconds"] = json!(-1.0);
        assert!(load_from_str(&v.to_string()).is_err());

        let mut v = base_config();
        v["logics"][0]["items"][0] =
            json!({"order": 1, "type": "mouse_input", "button": "left", "x_ratio": 1.5, "y_ratio": 0.5});
        assert!(load_from_str(&v.to_string()).is_err());
    }

    #[test]
    fn test_force_stop_key_cannot_shadow_trigger() {
        let mut v = base_config();
        v["settings"]["force_stop_key"] = json!({"key": "Enter"});
        let err = load_from_str(&v.to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("collides"));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", base_config()).unwrap();
        let cfg = load_from_path(file.path()).unwrap();
        assert_eq!(cfg.logics[0].name, "combo");
    }

    #[test]
    fn test_schema_mentions_items() {
        let mut out = Vec::new();
        write_schema_to_writer(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("nested_logic"));
        assert!(text.contains("repeat_count"));
    }
}
