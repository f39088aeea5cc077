//! Source of a current bearer token for backend clients.
//!
//! Rotation atomically swaps a single reference (`arc_swap::ArcSwap`); no
//! reader ever blocks on it, and readers never see a torn value: an
//! in-flight request holds an `Arc<str>` it already cloned out, so a
//! rotation underneath it has no effect on that request.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

/// A bearer token that refuses to print itself. `Debug`/`Display` always
/// render the redaction marker, so a stray `tracing::info!("{:?}", token)`
/// or error message can never leak the value.
#[derive(Clone)]
pub struct Secret(Arc<str>);

impl Secret {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

#[async_trait]
pub trait SecretWatcher: Send + Sync {
    /// The current token. Never blocks.
    fn current_token(&self) -> Option<Secret>;

    /// Whether a value has ever been successfully read.
    fn is_ready(&self) -> bool;
}

/// Wraps a fixed value — for integrations with static credentials and for
/// tests.
pub struct StaticSecretWatcher {
    token: Secret,
}

impl StaticSecretWatcher {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self { token: Secret::new(token) }
    }
}

impl SecretWatcher for StaticSecretWatcher {
    fn current_token(&self) -> Option<Secret> {
        Some(self.token.clone())
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Re-reads a file on disk whenever [`FileSecretWatcher::refresh`] is called
/// by the owning periodic refresh task. `is_ready` is false until the first
/// successful read; a client whose watcher is not ready reports Degraded.
pub struct FileSecretWatcher {
    path: PathBuf,
    current: ArcSwap<Option<Secret>>,
}

impl FileSecretWatcher {
    pub fn new(path: PathBuf) -> Self {
        Self { path, current: ArcSwap::from_pointee(None) }
    }

    pub async fn refresh(&self) -> std::io::Result<()> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let trimmed = contents.trim().to_string();
        self.current.store(Arc::new(Some(Secret::new(trimmed))));
        Ok(())
    }
}

impl SecretWatcher for FileSecretWatcher {
    fn current_token(&self) -> Option<Secret> {
        self.current.load().as_ref().clone()
    }

    fn is_ready(&self) -> bool {
        self.current.load().is_some()
    }
}
