//! # obsplane — observability integration plane
//!
//! Exposes remote observability backends (log stores, dashboard/metric
//! services) to AI assistants through a single, dynamically published tool
//! surface. An assistant starts from coarse signals (severity counts per
//! namespace), drills into clustered log patterns with novelty flags, and
//! only then reads raw lines — all through a uniform, instance-parametrised
//! set of tools.
//!
//! ## Architecture
//!
//! - [`config`] — the persisted `IntegrationsDocument`, its atomic-write
//!   store, and the debounced file watcher that notices edits.
//! - [`secret`] — rotatable bearer tokens backend clients read without
//!   blocking.
//! - [`version`] — semantic version parsing and `minVersion` compatibility.
//! - [`integration`] — the `IntegrationShell` contract every backend
//!   implements, plus the lifecycle state machine and health reporting.
//! - [`registry`] — the compile-time factory map and the live instance map.
//! - [`tools`] — the publish/unpublish/dispatch port for tool descriptors.
//! - [`templates`] — Drain-style online log clustering.
//! - [`lifecycle`] — the reconciler: diffs desired vs. running state, starts
//!   and stops instances, and drives the health loop's auto-recovery.
//! - [`integrations`] — reference `IntegrationShell` implementations
//!   (`vlogs`, `promq`).
//! - [`server`] — the thin `axum` HTTP surface.
//! - [`telemetry`] — tracing/metrics setup.
//! - [`error`] — the crate-wide error taxonomy.

pub mod config;
pub mod error;
pub mod integration;
pub mod integrations;
pub mod lifecycle;
pub mod registry;
pub mod secret;
pub mod server;
pub mod telemetry;
pub mod templates;
pub mod tools;
pub mod version;

pub use config::{ConfigStore, FileWatcher, InstanceConfig, IntegrationsDocument};
pub use error::ObsplaneError;
pub use integration::{FactoryContext, HealthReport, IntegrationShell, LifecycleState, ShellContext, ShellMetadata};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use registry::{FactoryRegistry, InstanceRegistry};
pub use secret::{Secret, SecretWatcher};
pub use tools::{InMemoryToolPort, ToolPort};
pub use version::{Version, VersionReq};

/// Library version, surfaced in the `/healthz` body and `obsplane-daemon --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
