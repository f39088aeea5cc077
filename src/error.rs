//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own `thiserror` enum so callers can match on a
//! kind discriminator instead of parsing message strings; everything folds
//! into [`ObsplaneError`] at the boundaries that need a single error type
//! (the reconciler, the HTTP server).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("malformed version string: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed integrations document: {0}")]
    Malformed(String),
    #[error("unknown schema version: {0}")]
    UnknownSchemaVersion(String),
    #[error("duplicate instance name: {0}")]
    DuplicateName(String),
    #[error("unknown integration type: {0}")]
    UnknownType(String),
    #[error("invalid minVersion for instance {name}: {source}")]
    InvalidMinVersion { name: String, #[source] source: VersionError },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("factory type name must not be empty")]
    EmptyType,
    #[error("factory already registered for type: {0}")]
    AlreadyRegistered(String),
    #[error("no factory registered for type: {0}")]
    NotRegistered(String),
    #[error("settings invalid for instance {name}: {reason}")]
    InvalidSettings { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance already present in registry: {0}")]
    AlreadyPresent(String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("factory missing for instance {name} (type {type_name})")]
    FactoryMissing { name: String, type_name: String },
    #[error("instance {name} requires {type_name} >= {required}, factory declares {actual}")]
    VersionUnsatisfied { name: String, type_name: String, required: String, actual: String },
    #[error("start failed for instance {name}: {reason}")]
    StartFailed { name: String, reason: String },
    #[error("health probe failed for instance {name}: {reason}")]
    HealthProbeFailed { name: String, reason: String },
}

#[derive(Debug, Error, Clone, serde::Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("leading wildcard is not permitted in this field")]
    LeadingWildcardRejected,
    #[error("window must be at least 15 minutes")]
    WindowTooSmall,
    #[error("secret unavailable for this instance")]
    SecretUnavailable,
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("tool not published: {0}")]
    NotPublished(String),
}

#[derive(Debug, Error)]
pub enum ObsplaneError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Exponential backoff schedule used by the health loop's auto-recovery:
/// 30s, 1m, 2m, 5m, then steady at 5m.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    steps: [std::time::Duration; 4],
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        use std::time::Duration;
        Self {
            steps: [
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(300),
            ],
        }
    }
}

impl BackoffSchedule {
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let idx = (attempt as usize).min(self.steps.len() - 1);
        self.steps[idx]
    }
}
