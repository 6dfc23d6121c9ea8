//! Reload Logics when the config file changes.
//!
//! The parent directory is watched (editors often replace the file rather than
//! write in place) and events are filtered down to the config's file name.
//! A reload that fails to parse or validate is logged and the previous Logic
//! set stays active. Only `logics` are reloaded; settings need a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::load_from_path_async;

use super::MemoryLogicStore;

/// Bursts of file events within this window trigger one reload.
const DEBOUNCE: Duration = Duration::from_millis(150);

/// Keeps the watcher alive. Dropping it stops reloading.
pub struct ConfigWatch {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `path`. Must be called inside a Tokio runtime.
pub fn watch_config(path: impl AsRef<Path>, store: Arc<MemoryLogicStore>) -> Result<ConfigWatch> {
    let path = path.as_ref().to_path_buf();
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .with_context(|| format!("Config path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let relevant = (event.kind.is_modify() || event.kind.is_create())
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
            if relevant {
                let _ = tx.send(());
            }
        }
        Err(err) => warn!(target: "logic_engine::store", error = %err, "Config watch error"),
    })
    .context("Failed to create config watcher")?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;

    info!(target: "logic_engine::store", path = %path.display(), "Watching config for changes");

    let task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            match load_from_path_async(&path).await {
                Ok(cfg) => {
                    debug!(target: "logic_engine::store", logics = cfg.logics.len(), "Config reloaded");
                    store.replace(cfg.logics);
                }
                Err(err) => warn!(
                    target: "logic_engine::store",
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "Config reload failed; keeping previous logics"
                ),
            }
        }
    });

    Ok(ConfigWatch {
        _watcher: watcher,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LogicStore;
    use serde_json::json;

    fn config_with(id: &str) -> String {
        json!({
            "logics": [{
                "id": id,
                "name": id,
                "trigger": {"key": "F1", "scan_code": 59},
                "items": [{"order": 1, "type": "delay", "duration_seconds": 0.0}]
            }]
        })
        .to_string()
    }

    async fn wait_for(store: &MemoryLogicStore, id: &str) -> bool {
        for _ in 0..100 {
            if store.resolve(id).is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_reload_on_change_and_keep_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logics.json");
        std::fs::write(&path, config_with("first")).unwrap();

        let store = Arc::new(MemoryLogicStore::new(
            crate::config::load_from_path(&path).unwrap().logics,
        ));
        let _watch = watch_config(&path, Arc::clone(&store)).unwrap();

        std::fs::write(&path, config_with("second")).unwrap();
        assert!(wait_for(&store, "second").await);

        std::fs::write(&path, "{ not json").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.resolve("second").is_some());
    }
}
