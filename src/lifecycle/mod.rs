//! The reconciler: the only writer of `InstanceRegistry`, the only caller of
//! factory constructors, and the owner of every running
//! `Box<dyn IntegrationShell>`.

pub mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConfigStore, InstanceConfig, IntegrationsDocument};
use crate::error::{BackoffSchedule, LifecycleError};
use crate::integration::{FactoryContext, HealthReport, IntegrationShell, LifecycleState, ShellContext, ShellMetadata};
use crate::registry::{FactoryRegistry, InstanceHandle, InstanceRegistry};
use crate::secret::SecretWatcher;
use crate::tools::{InMemoryToolPort, ToolPort};
use crate::version::VersionReq;

use reconcile::diff;

/// Tunables carried in from the CLI.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub min_global_version: Option<VersionReq>,
    pub health_period: Duration,
    pub stop_grace: Duration,
    pub health_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_global_version: None,
            health_period: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
        }
    }
}

struct RunningInstance {
    shell: Arc<dyn IntegrationShell>,
    config: InstanceConfig,
    attempt: u32,
}

fn tool_prefix(type_name: &str, name: &str) -> String {
    format!("{type_name}_{name}_")
}

/// Stand-alone stop routine taking owned handles instead of `&self`, so it
/// can be spawned as a `'static` task for the shutdown path's parallel stop.
async fn stop_one(
    name: String,
    running: RunningInstance,
    instances: Arc<InstanceRegistry>,
    tools: Arc<dyn ToolPort>,
    http: reqwest::Client,
    stop_grace: Duration,
) {
    if let Some(handle) = instances.get(&name) {
        handle.set_state(LifecycleState::Stopping);
    }
    tools.unpublish_prefix(&tool_prefix(&running.config.type_name, &name));

    let ctx = ShellContext::new(stop_grace, http);
    match tokio::time::timeout(stop_grace, running.shell.stop(ctx)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(name, error = %err, "instance reported an error while stopping"),
        Err(_) => warn!(name, "instance did not stop within the grace deadline"),
    }

    if let Some(handle) = instances.remove(&name) {
        handle.set_state(LifecycleState::Stopped);
    }
}

/// Serializes reconciles, owns live instances, and drives the health loop.
///
/// Only one reconcile runs at a time: a second caller arriving mid-reconcile
/// doesn't queue — it lands in a single "pending" slot and the in-flight
/// reconcile picks up the *latest* desired state once it finishes.
pub struct LifecycleManager {
    factories: Arc<FactoryRegistry>,
    instances: Arc<InstanceRegistry>,
    tools: Arc<dyn ToolPort>,
    config_store: Arc<ConfigStore>,
    http: reqwest::Client,
    secret: Option<Arc<dyn SecretWatcher>>,
    config: LifecycleConfig,
    backoff: BackoffSchedule,

    reconcile_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Option<IntegrationsDocument>>,
    notify: Notify,
    running: tokio::sync::Mutex<HashMap<String, RunningInstance>>,
    shutdown: CancellationToken,
}

impl LifecycleManager {
    pub fn new(
        factories: Arc<FactoryRegistry>,
        instances: Arc<InstanceRegistry>,
        config_store: Arc<ConfigStore>,
        http: reqwest::Client,
        secret: Option<Arc<dyn SecretWatcher>>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            factories,
            instances,
            tools: Arc::new(InMemoryToolPort::new()),
            config_store,
            http,
            secret,
            config,
            backoff: BackoffSchedule::default(),
            reconcile_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            notify: Notify::new(),
            running: tokio::sync::Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn tools(&self) -> Arc<dyn ToolPort> {
        self.tools.clone()
    }

    pub fn instances(&self) -> Arc<InstanceRegistry> {
        self.instances.clone()
    }

    pub fn config_store(&self) -> Arc<ConfigStore> {
        self.config_store.clone()
    }

    pub fn factories(&self) -> Arc<FactoryRegistry> {
        self.factories.clone()
    }

    /// Request a reconcile against `desired`. Coalesced with any other
    /// pending request: only the latest desired state wins, and `run`'s
    /// background loop (not this call) performs the reconcile.
    pub fn request_reconcile(&self, desired: IntegrationsDocument) {
        *self.pending.lock() = Some(desired);
        self.notify.notify_one();
    }

    /// Run the reconcile loop until cancelled: waits for a pending desired
    /// state, applies it, and repeats.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = self.notify.notified() => {
                    self.drain_pending().await;
                }
            }
        }
    }

    /// Run the health loop until cancelled: probes every running instance
    /// every `health_period`.
    pub async fn run_health_loop(self: &Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.health_period);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    self.tick_health().await;
                }
            }
        }
    }

    async fn drain_pending(&self) {
        let _guard = self.reconcile_lock.lock().await;
        loop {
            let desired = self.pending.lock().take();
            let Some(desired) = desired else { break };
            if let Err(err) = self.reconcile(desired).await {
                error!(error = %err, "reconcile failed");
            }
        }
    }

    async fn reconcile(&self, desired: IntegrationsDocument) -> Result<(), LifecycleError> {
        desired.validate(&self.factories)?;

        let previous = {
            let running = self.running.lock().await;
            let instances = running.values().map(|r| r.config.clone()).collect();
            IntegrationsDocument { schema_version: desired.schema_version.clone(), instances }
        };

        let plan = diff(Some(&previous), &desired);

        for name in &plan.removed {
            self.stop_instance(name).await;
        }
        for config in &plan.changed {
            self.stop_instance(&config.name).await;
        }

        for config in plan.changed.iter().chain(plan.added.iter()) {
            if let Err(err) = self.start_instance(config.clone()).await {
                error!(name = %config.name, error = %err, "failed to start instance");
            }
        }

        Ok(())
    }

    /// Construct and start one instance. A factory or version-floor failure
    /// leaves the instance `Failed` (terminal until a config reload replaces
    /// it); a `start`/tool-publish failure leaves it `Degraded` so the
    /// health loop's backoff can retry it in place.
    async fn start_instance(&self, config: InstanceConfig) -> Result<(), LifecycleError> {
        let factory = match self.factories.lookup(&config.type_name) {
            Ok(factory) => factory,
            Err(_) => {
                self.mark_failed(&config, None);
                return Err(LifecycleError::FactoryMissing {
                    name: config.name.clone(),
                    type_name: config.type_name.clone(),
                });
            }
        };

        let factory_ctx = FactoryContext { http: self.http.clone(), secret: self.secret.clone() };
        let shell: Box<dyn IntegrationShell> = match factory(&config, factory_ctx) {
            Ok(shell) => shell,
            Err(err) => {
                self.mark_failed(&config, None);
                return Err(LifecycleError::StartFailed { name: config.name.clone(), reason: err.to_string() });
            }
        };

        let metadata = shell.metadata();
        if let Err(err) = self.check_version_floor(&config, &metadata) {
            self.mark_failed(&config, Some(metadata));
            return Err(err);
        }

        let handle = Arc::new(InstanceHandle::new(metadata));
        handle.set_state(LifecycleState::Starting);
        let _ = self.instances.remove(&config.name);
        self.instances.put(handle.clone()).map_err(|_| LifecycleError::StartFailed {
            name: config.name.clone(),
            reason: "duplicate instance name in registry".into(),
        })?;

        let shell: Arc<dyn IntegrationShell> = Arc::from(shell);
        let ctx = ShellContext::new(self.config.health_timeout, self.http.clone());
        let start_result = shell.start(ctx).await;

        self.running.lock().await.insert(
            config.name.clone(),
            RunningInstance { shell: shell.clone(), config: config.clone(), attempt: 0 },
        );

        if let Err(err) = start_result {
            handle.set_state(LifecycleState::Degraded);
            handle.set_health(HealthReport::degraded(err.to_string()));
            return Err(err);
        }

        if let Err(err) = self.publish_tools_atomically(&config, &shell).await {
            handle.set_state(LifecycleState::Degraded);
            handle.set_health(HealthReport::degraded(err.to_string()));
            return Err(err);
        }

        handle.set_state(LifecycleState::Healthy);
        handle.set_health(HealthReport::healthy());
        Ok(())
    }

    /// Publish `config`'s tools all-or-nothing: on a failed `register_tools`,
    /// anything it managed to publish under this instance's prefix is rolled
    /// back.
    async fn publish_tools_atomically(
        &self,
        config: &InstanceConfig,
        shell: &Arc<dyn IntegrationShell>,
    ) -> Result<(), LifecycleError> {
        let prefix = tool_prefix(&config.type_name, &config.name);
        self.tools.unpublish_prefix(&prefix);
        if let Err(err) = shell.register_tools(self.tools.as_ref()).await {
            self.tools.unpublish_prefix(&prefix);
            return Err(err);
        }
        Ok(())
    }

    fn mark_failed(&self, config: &InstanceConfig, metadata: Option<ShellMetadata>) {
        let metadata = metadata.unwrap_or_else(|| ShellMetadata {
            name: config.name.clone(),
            type_name: config.type_name.clone(),
            version: crate::version::Version::new(0, 0, 0),
            description: String::new(),
        });
        let handle = Arc::new(InstanceHandle::new(metadata));
        handle.set_state(LifecycleState::Failed);
        handle.set_health(HealthReport::degraded("failed to construct or validate instance"));
        let _ = self.instances.remove(&config.name);
        let _ = self.instances.put(handle);
    }

    async fn stop_instance(&self, name: &str) {
        let removed = self.running.lock().await.remove(name);
        let Some(running) = removed else { return };
        stop_one(
            name.to_string(),
            running,
            self.instances.clone(),
            self.tools.clone(),
            self.http.clone(),
            self.config.stop_grace,
        )
        .await;
    }

    fn check_version_floor(&self, config: &InstanceConfig, metadata: &ShellMetadata) -> Result<(), LifecycleError> {
        let requirement = config
            .min_version_req()
            .map_err(LifecycleError::Config)?
            .or_else(|| self.config.min_global_version.clone());

        if let Some(req) = requirement {
            if !metadata.version.satisfies(&req) {
                return Err(LifecycleError::VersionUnsatisfied {
                    name: config.name.clone(),
                    type_name: config.type_name.clone(),
                    required: req.to_string(),
                    actual: metadata.version.to_string(),
                });
            }
        }
        Ok(())
    }

    /// One pass of the health loop: probe every running instance in
    /// sequence, log Healthy->Degraded transitions, and kick off recovery
    /// for instances still degraded. Recovery itself runs on its own spawned
    /// task so one instance's backoff sleep never delays the next
    /// instance's probe.
    pub async fn tick_health(self: &Arc<Self>) {
        let snapshot: Vec<(String, Arc<dyn IntegrationShell>)> = {
            let running = self.running.lock().await;
            running.iter().map(|(name, r)| (name.clone(), r.shell.clone())).collect()
        };

        for (name, shell) in snapshot {
            let Some(handle) = self.instances.get(&name) else { continue };
            let ctx = ShellContext::new(self.config.health_timeout, self.http.clone());
            let report = shell.health(ctx).await;
            let was_healthy = handle.state() == LifecycleState::Healthy;
            handle.set_health(report.clone());

            use crate::integration::HealthState;
            match report.state {
                HealthState::Healthy => {
                    handle.set_state(LifecycleState::Healthy);
                    let mut running = self.running.lock().await;
                    if let Some(r) = running.get_mut(&name) {
                        r.attempt = 0;
                    }
                }
                HealthState::Degraded | HealthState::Stopped => {
                    if was_healthy {
                        warn!(name, message = ?report.message, "instance transitioned to degraded");
                    }
                    handle.set_state(LifecycleState::Degraded);
                    let manager = self.clone();
                    tokio::spawn(async move { manager.recover(&name).await });
                }
            }
        }
    }

    async fn recover(&self, name: &str) {
        let attempt = {
            let running = self.running.lock().await;
            running.get(name).map(|r| r.attempt).unwrap_or(0)
        };
        let delay = self.backoff.delay_for_attempt(attempt);
        info!(name, attempt, delay_secs = delay.as_secs(), "scheduling degraded-instance restart");

        let config = {
            let running = self.running.lock().await;
            running.get(name).map(|r| r.config.clone())
        };
        let Some(config) = config else { return };

        tokio::time::sleep(delay).await;
        self.stop_instance(name).await;
        if let Err(err) = self.start_instance(config).await {
            error!(name, error = %err, "recovery attempt failed");
            let mut running = self.running.lock().await;
            if let Some(r) = running.get_mut(name) {
                r.attempt += 1;
            }
        }
    }

    /// Cancel the reconcile/health loops and stop every running instance in
    /// parallel, bounded by `stop_grace`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<(String, RunningInstance)> = self.running.lock().await.drain().collect();

        let mut tasks = Vec::with_capacity(drained.len());
        for (name, running) in drained {
            tasks.push(tokio::spawn(stop_one(
                name,
                running,
                self.instances.clone(),
                self.tools.clone(),
                self.http.clone(),
                self.config.stop_grace,
            )));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}
