//! The polymorphic contract every backend integration implements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;
use crate::secret::SecretWatcher;
use crate::tools::ToolPort;

/// Deadline-bearing context passed into every suspension point.
#[derive(Clone)]
pub struct ShellContext {
    pub cancellation: CancellationToken,
    pub deadline: Duration,
    pub http: reqwest::Client,
}

impl ShellContext {
    pub fn new(deadline: Duration, http: reqwest::Client) -> Self {
        Self { cancellation: CancellationToken::new(), deadline, http }
    }

    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
            http: self.http.clone(),
        }
    }
}

/// What a factory is given to construct an instance.
pub struct FactoryContext {
    pub http: reqwest::Client,
    pub secret: Option<Arc<dyn SecretWatcher>>,
}

/// `Arc<dyn Fn(...) -> Result<...>>` — a compiled-in constructor for one
/// integration type, looked up by name in [`crate::registry::FactoryRegistry`].
pub type Factory = Arc<
    dyn Fn(&crate::config::InstanceConfig, FactoryContext) -> Result<Box<dyn IntegrationShell>, crate::error::FactoryError>
        + Send
        + Sync,
>;

/// Lifecycle state machine:
/// `Registered -> Starting -> Healthy <-> Degraded -> Stopping -> Stopped`,
/// with `Failed` terminal for the instance's current lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Registered,
    Starting,
    Healthy,
    Degraded,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self { state: HealthState::Healthy, message: None, observed_at: Utc::now() }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self { state: HealthState::Degraded, message: Some(message.into()), observed_at: Utc::now() }
    }

    pub fn stopped() -> Self {
        Self { state: HealthState::Stopped, message: None, observed_at: Utc::now() }
    }
}

/// `{name, type, version, description}` declared by an implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellMetadata {
    pub name: String,
    pub type_name: String,
    pub version: crate::version::Version,
    pub description: String,
}

/// The capability contract every backend integration must implement.
/// Implementations are selected by type label via
/// [`crate::registry::FactoryRegistry`] — no inheritance trees.
#[async_trait]
pub trait IntegrationShell: Send + Sync {
    fn metadata(&self) -> ShellMetadata;

    async fn start(&self, ctx: ShellContext) -> Result<(), LifecycleError>;

    async fn stop(&self, ctx: ShellContext) -> Result<(), LifecycleError>;

    async fn health(&self, ctx: ShellContext) -> HealthReport;

    /// Publish this instance's tools through the port. Called once after a
    /// successful `start`, and again on a reload that changes settings.
    async fn register_tools(&self, port: &dyn ToolPort) -> Result<(), LifecycleError>;
}
