//! Logic lookup.
//!
//! The engine only reads Logics; authoring and persistence live elsewhere.
//! Lookups hand out `Arc<Logic>` snapshots, so a run keeps the definition it
//! started with even if the store is replaced mid-run.

pub mod watch;

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::{KeyBinding, Logic};

pub use watch::{ConfigWatch, watch_config};

pub trait LogicStore: Send + Sync {
    /// Any Logic by id, nested-only ones included.
    fn resolve(&self, id: &str) -> Option<Arc<Logic>>;

    /// First non-nested Logic whose trigger is exactly `(key, scan_code)`.
    fn find_by_trigger(&self, key: &str, scan_code: u32) -> Option<Arc<Logic>>;

    /// First non-nested Logic whose trigger `binding` would also match.
    fn find_shadowed_by(&self, binding: &KeyBinding) -> Option<Arc<Logic>>;
}

/// In-memory store whose whole set can be swapped atomically.
#[derive(Default)]
pub struct MemoryLogicStore {
    logics: RwLock<Vec<Arc<Logic>>>,
}

impl MemoryLogicStore {
    pub fn new(logics: impl IntoIterator<Item = Logic>) -> Self {
        Self {
            logics: RwLock::new(logics.into_iter().map(Arc::new).collect()),
        }
    }

    pub fn replace(&self, logics: impl IntoIterator<Item = Logic>) {
        let next: Vec<Arc<Logic>> = logics.into_iter().map(Arc::new).collect();
        let count = next.len();
        if let Ok(mut slot) = self.logics.write() {
            *slot = next;
            info!(target: "logic_engine::store", logics = count, "Logic set replaced");
        }
    }

    pub fn len(&self) -> usize {
        self.logics.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, pred: impl Fn(&Logic) -> bool) -> Option<Arc<Logic>> {
        let logics = self.logics.read().ok()?;
        logics.iter().find(|logic| pred(logic)).cloned()
    }
}

impl LogicStore for MemoryLogicStore {
    fn resolve(&self, id: &str) -> Option<Arc<Logic>> {
        self.find(|logic| logic.id == id)
    }

    fn find_by_trigger(&self, key: &str, scan_code: u32) -> Option<Arc<Logic>> {
        self.find(|logic| logic.is_triggered_by(key, scan_code))
    }

    fn find_shadowed_by(&self, binding: &KeyBinding) -> Option<Arc<Logic>> {
        self.find(|logic| {
            !logic.is_nested
                && logic
                    .trigger
                    .as_ref()
                    .is_some_and(|trigger| binding.matches(&trigger.key, trigger.scan_code))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Modifiers, Trigger};

    fn logic(id: &str, key: &str, scan: u32, nested: bool) -> Logic {
        Logic {
            id: id.into(),
            name: id.into(),
            trigger: (!nested).then(|| Trigger {
                key: key.into(),
                scan_code: scan,
                virtual_key: 0,
                modifiers: Modifiers::NONE,
            }),
            is_nested: nested,
            repeat_count: 1,
            items: vec![],
        }
    }

    #[test]
    fn test_trigger_lookup_is_exact() {
        let store = MemoryLogicStore::new([logic("a", "A", 30, false)]);
        assert!(store.find_by_trigger("A", 30).is_some());
        assert!(store.find_by_trigger("A", 31).is_none());
        assert!(store.find_by_trigger("a", 30).is_none());
    }

    #[test]
    fn test_nested_unreachable_by_trigger_but_resolvable() {
        let mut nested = logic("n", "A", 30, true);
        nested.trigger = Some(Trigger {
            key: "A".into(),
            scan_code: 30,
            virtual_key: 0x41,
            modifiers: Modifiers::NONE,
        });
        let store = MemoryLogicStore::new([nested]);
        assert!(store.find_by_trigger("A", 30).is_none());
        assert_eq!(store.resolve("n").unwrap().id, "n");
    }

    #[test]
    fn test_binding_shadow_lookup() {
        let store = MemoryLogicStore::new([logic("n", "F12", 88, true), logic("f12", "F12", 88, false)]);
        assert_eq!(store.find_shadowed_by(&KeyBinding::new("f12")).unwrap().id, "f12");
        assert!(store.find_shadowed_by(&KeyBinding::new("F12").with_scan_code(87)).is_none());
        assert!(store.find_shadowed_by(&KeyBinding::new("F11")).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let store = MemoryLogicStore::new([logic("first", "F1", 59, false), logic("second", "F1", 59, false)]);
        assert_eq!(store.find_by_trigger("F1", 59).unwrap().id, "first");
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let store = MemoryLogicStore::new([logic("a", "A", 30, false)]);
        let held = store.resolve("a").unwrap();
        store.replace([logic("b", "B", 48, false)]);
        assert_eq!(held.id, "a");
        assert!(store.resolve("a").is_none());
        assert_eq!(store.len(), 1);
    }
}
