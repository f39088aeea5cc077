//! Debounced filesystem watch over the integrations document.
//!
//! `notify` + `notify_debouncer_full` watch the file's parent directory and
//! re-hash content before firing, so an atomic-replace editor (write-new-file,
//! rename-over-target) that happens to produce identical bytes doesn't
//! trigger a redundant reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a single config file and emits a signal each time its content
/// actually changes. Renames and atomic replaces (the common pattern for
/// editors and `ConfigStore::write`) are followed transparently because the
/// debouncer watches the parent directory and filters by file name.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    reload_tx: broadcast::Sender<()>,
    path: PathBuf,
}

impl FileWatcher {
    /// Begin watching `path` with the default 500ms debounce.
    pub fn watch(path: impl Into<PathBuf>) -> notify::Result<Self> {
        Self::watch_with_debounce(path, DEFAULT_DEBOUNCE)
    }

    pub fn watch_with_debounce(path: impl Into<PathBuf>, debounce: Duration) -> notify::Result<Self> {
        let path = path.into();
        let watched_name = path.file_name().map(|n| n.to_owned());
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

        let (reload_tx, _) = broadcast::channel(16);
        let tx = reload_tx.clone();
        let last_hash: Arc<Mutex<Option<[u8; 32]>>> = Arc::new(Mutex::new(None));
        let hash_path = path.clone();

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let Ok(events) = result else { return };
            let touches_target = events.iter().any(|event| {
                event
                    .event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == watched_name.as_deref())
            });
            if !touches_target {
                return;
            }

            let digest = std::fs::read(&hash_path).ok().map(|bytes| {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let result = hasher.finalize();
                let mut out = [0u8; 32];
                out.copy_from_slice(&result);
                out
            });

            let mut guard = last_hash.lock();
            if *guard == digest {
                return;
            }
            *guard = digest;
            let _ = tx.send(());
        })?;

        debouncer.watch(&parent, notify::RecursiveMode::NonRecursive)?;

        Ok(Self { _debouncer: debouncer, reload_tx, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn edit_triggers_a_reload_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        tokio::fs::write(&path, r#"{"schemaVersion":"v1","instances":[]}"#).await.unwrap();

        let watcher = FileWatcher::watch_with_debounce(&path, StdDuration::from_millis(50)).unwrap();
        let mut rx = watcher.subscribe();

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        tokio::fs::write(&path, r#"{"schemaVersion":"v1","instances":[{"name":"a","type":"vlogs"}]}"#)
            .await
            .unwrap();

        let signalled = tokio::time::timeout(StdDuration::from_secs(2), rx.recv()).await;
        assert!(signalled.is_ok());
    }

    #[tokio::test]
    async fn rewriting_identical_content_does_not_signal_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrations.json");
        let body = r#"{"schemaVersion":"v1","instances":[]}"#;
        tokio::fs::write(&path, body).await.unwrap();

        let watcher = FileWatcher::watch_with_debounce(&path, StdDuration::from_millis(50)).unwrap();
        let mut rx = watcher.subscribe();

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        tokio::fs::write(&path, body).await.unwrap();

        let signalled = tokio::time::timeout(StdDuration::from_millis(500), rx.recv()).await;
        assert!(signalled.is_err(), "identical rewrite should not produce a reload signal");
    }
}
