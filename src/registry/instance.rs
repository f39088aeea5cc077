//! Thread-safe map of instance name -> live handle + latest health.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::error::InstanceError;
use crate::integration::{HealthReport, LifecycleState, ShellMetadata};
use crate::version::Version;

/// A read-only enrichment handle. The live `Box<dyn IntegrationShell>` stays
/// owned by the `LifecycleManager`; this handle only exposes what config-CRUD
/// handlers and health queries need.
pub struct InstanceHandle {
    pub name: String,
    pub type_name: String,
    pub version: Version,
    state: ArcSwap<LifecycleState>,
    health: ArcSwap<HealthReport>,
}

impl InstanceHandle {
    pub fn new(metadata: ShellMetadata) -> Self {
        Self {
            name: metadata.name,
            type_name: metadata.type_name,
            version: metadata.version,
            state: ArcSwap::from_pointee(LifecycleState::Registered),
            health: ArcSwap::from_pointee(HealthReport::healthy()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(Arc::new(state));
    }

    pub fn health(&self) -> Arc<HealthReport> {
        self.health.load_full()
    }

    pub fn set_health(&self, report: HealthReport) {
        self.health.store(Arc::new(report));
    }
}

/// Thread-safe name -> handle map. Only the `LifecycleManager` calls
/// `put`/`remove`; handlers enriching configs with live state call
/// `get`/`list`.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, Arc<InstanceHandle>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate `put` is a programmer error: the reconciler must always
    /// `remove` before re-adding the same name.
    pub fn put(&self, handle: Arc<InstanceHandle>) -> Result<(), InstanceError> {
        let name = handle.name.clone();
        match self.instances.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(InstanceError::AlreadyPresent(name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<InstanceHandle>> {
        self.instances.remove(name).map(|(_, v)| v)
    }

    pub fn get(&self, name: &str) -> Option<Arc<InstanceHandle>> {
        self.instances.get(name).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<Arc<InstanceHandle>> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> Arc<InstanceHandle> {
        Arc::new(InstanceHandle::new(ShellMetadata {
            name: name.to_string(),
            type_name: "vlogs".to_string(),
            version: Version::new(1, 0, 0),
            description: "test".to_string(),
        }))
    }

    #[test]
    fn put_then_get_then_remove() {
        let registry = InstanceRegistry::new();
        registry.put(handle("prod")).unwrap();
        assert!(registry.get("prod").is_some());
        assert!(registry.remove("prod").is_some());
        assert!(registry.get("prod").is_none());
    }

    #[test]
    fn duplicate_put_fails_fast() {
        let registry = InstanceRegistry::new();
        registry.put(handle("prod")).unwrap();
        assert!(matches!(registry.put(handle("prod")), Err(InstanceError::AlreadyPresent(_))));
    }

    #[test]
    fn get_on_missing_is_absent_not_error() {
        let registry = InstanceRegistry::new();
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn health_snapshot_is_consistent_across_concurrent_readers() {
        let h = handle("prod");
        h.set_health(HealthReport::degraded("probe timed out"));
        let snap = h.health();
        assert_eq!(snap.message.as_deref(), Some("probe timed out"));
    }
}
