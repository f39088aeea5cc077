//! Compile-time map of integration type name to constructor.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::FactoryError;
use crate::integration::Factory;

/// Process-wide registry, populated during image assembly before the
/// reconciler starts. Reads dominate, so a single reader-writer lock
/// suffices; no factory is ever invoked while the lock is held.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, type_name: &str, factory: Factory) -> Result<(), FactoryError> {
        if type_name.is_empty() {
            return Err(FactoryError::EmptyType);
        }
        let mut factories = self.factories.write();
        if factories.contains_key(type_name) {
            return Err(FactoryError::AlreadyRegistered(type_name.to_string()));
        }
        factories.insert(type_name.to_string(), factory);
        Ok(())
    }

    pub fn lookup(&self, type_name: &str) -> Result<Factory, FactoryError> {
        self.factories
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| FactoryError::NotRegistered(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.read().contains_key(type_name)
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use crate::integration::FactoryContext;
    use std::sync::Arc;

    fn dummy_factory() -> Factory {
        Arc::new(|_cfg: &InstanceConfig, _ctx: FactoryContext| {
            Err(FactoryError::InvalidSettings { name: "x".into(), reason: "unused in test".into() })
        })
    }

    #[test]
    fn register_then_lookup() {
        let registry = FactoryRegistry::new();
        registry.register("vlogs", dummy_factory()).unwrap();
        assert!(registry.lookup("vlogs").is_ok());
        assert_eq!(registry.list(), vec!["vlogs".to_string()]);
    }

    #[test]
    fn rejects_empty_name() {
        let registry = FactoryRegistry::new();
        assert!(matches!(registry.register("", dummy_factory()), Err(FactoryError::EmptyType)));
    }

    #[test]
    fn rejects_duplicate_registration() {
        let registry = FactoryRegistry::new();
        registry.register("vlogs", dummy_factory()).unwrap();
        assert!(matches!(
            registry.register("vlogs", dummy_factory()),
            Err(FactoryError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn lookup_missing_is_not_registered() {
        let registry = FactoryRegistry::new();
        assert!(matches!(registry.lookup("ghost"), Err(FactoryError::NotRegistered(_))));
    }
}
