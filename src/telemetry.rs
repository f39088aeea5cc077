//! Tracing subscriber setup and the Prometheus text-exposition gauges
//! behind `GET /metrics`.

use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use crate::integration::LifecycleState;
use crate::registry::InstanceRegistry;
use crate::tools::ToolPort;

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub struct Metrics {
    registry: Registry,
    instances_healthy: IntGauge,
    instances_degraded: IntGauge,
    instances_failed: IntGauge,
    tools_published: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let instances_healthy =
            IntGauge::new("obsplane_instances_healthy", "Instances currently Healthy").unwrap();
        let instances_degraded =
            IntGauge::new("obsplane_instances_degraded", "Instances currently Degraded").unwrap();
        let instances_failed =
            IntGauge::new("obsplane_instances_failed", "Instances currently Failed").unwrap();
        let tools_published =
            IntGauge::new("obsplane_tools_published", "Tool records currently published").unwrap();

        registry.register(Box::new(instances_healthy.clone())).unwrap();
        registry.register(Box::new(instances_degraded.clone())).unwrap();
        registry.register(Box::new(instances_failed.clone())).unwrap();
        registry.register(Box::new(tools_published.clone())).unwrap();

        Self { registry, instances_healthy, instances_degraded, instances_failed, tools_published }
    }

    /// Recompute every gauge from current state. Called just before each
    /// `/metrics` scrape rather than on every state transition, since the
    /// scrape interval is coarser than instance churn.
    pub fn refresh(&self, instances: &InstanceRegistry, tools: &dyn ToolPort) {
        let (mut healthy, mut degraded, mut failed) = (0i64, 0i64, 0i64);
        for handle in instances.list() {
            match handle.state() {
                LifecycleState::Healthy => healthy += 1,
                LifecycleState::Degraded => degraded += 1,
                LifecycleState::Failed => failed += 1,
                _ => {}
            }
        }
        self.instances_healthy.set(healthy);
        self.instances_degraded.set(degraded);
        self.instances_failed.set(failed);
        self.tools_published.set(tools.list().len() as i64);
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::{HealthReport, ShellMetadata};
    use crate::tools::InMemoryToolPort;
    use crate::version::Version;
    use std::sync::Arc;

    #[test]
    fn refresh_counts_instances_by_state() {
        let metrics = Metrics::new();
        let instances = InstanceRegistry::new();

        let healthy = Arc::new(crate::registry::InstanceHandle::new(ShellMetadata {
            name: "a".into(),
            type_name: "vlogs".into(),
            version: Version::new(1, 0, 0),
            description: String::new(),
        }));
        healthy.set_state(LifecycleState::Healthy);
        instances.put(healthy).unwrap();

        let degraded = Arc::new(crate::registry::InstanceHandle::new(ShellMetadata {
            name: "b".into(),
            type_name: "vlogs".into(),
            version: Version::new(1, 0, 0),
            description: String::new(),
        }));
        degraded.set_state(LifecycleState::Degraded);
        degraded.set_health(HealthReport::degraded("probe failed"));
        instances.put(degraded).unwrap();

        metrics.refresh(&instances, &InMemoryToolPort::new());
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("obsplane_instances_healthy 1"));
        assert!(rendered.contains("obsplane_instances_degraded 1"));
    }
}
