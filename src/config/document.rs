//! The persisted `IntegrationsDocument` and its invariants.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::FactoryRegistry;
use crate::version::VersionReq;

const SUPPORTED_SCHEMA_VERSION: &str = "v1";

/// A secret settings may reference instead of embedding a literal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub source: String,
    pub key: String,
}

/// One configured integration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "minVersion", default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl InstanceConfig {
    /// Parsed `minVersion`, if present.
    pub fn min_version_req(&self) -> Result<Option<VersionReq>, ConfigError> {
        match &self.min_version {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|source| ConfigError::InvalidMinVersion { name: self.name.clone(), source }),
        }
    }

    /// True when `other` differs in a way that requires a restart: type,
    /// minVersion, or serialized settings changed.
    pub fn differs_from(&self, other: &InstanceConfig) -> bool {
        self.type_name != other.type_name
            || self.min_version != other.min_version
            || self.settings != other.settings
    }
}

/// The whole desired-state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationsDocument {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub instances: Vec<InstanceConfig>,
}

impl IntegrationsDocument {
    pub fn empty() -> Self {
        Self { schema_version: SUPPORTED_SCHEMA_VERSION.to_string(), instances: Vec::new() }
    }

    /// Validate the document: known schema version, unique names, known
    /// types, parseable minVersion.
    pub fn validate(&self, factories: &FactoryRegistry) -> Result<(), ConfigError> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(ConfigError::UnknownSchemaVersion(self.schema_version.clone()));
        }

        let mut seen = HashSet::with_capacity(self.instances.len());
        for instance in &self.instances {
            if !seen.insert(instance.name.as_str()) {
                return Err(ConfigError::DuplicateName(instance.name.clone()));
            }
            if !factories.contains(&instance.type_name) {
                return Err(ConfigError::UnknownType(instance.type_name.clone()));
            }
            instance.min_version_req()?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::FactoryContext;
    use std::sync::Arc;

    fn registry_with(types: &[&str]) -> FactoryRegistry {
        let registry = FactoryRegistry::new();
        for t in types {
            registry
                .register(t, Arc::new(|_cfg: &InstanceConfig, _ctx: FactoryContext| {
                    Err(crate::error::FactoryError::InvalidSettings {
                        name: "unused".into(),
                        reason: "test factory never actually constructs".into(),
                    })
                }) as crate::registry::Factory)
                .unwrap();
        }
        registry
    }

    fn instance(name: &str, type_name: &str) -> InstanceConfig {
        InstanceConfig {
            name: name.into(),
            type_name: type_name.into(),
            min_version: None,
            settings: serde_json::json!({}),
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let registry = registry_with(&["vlogs"]);
        let doc = IntegrationsDocument {
            schema_version: "v1".into(),
            instances: vec![instance("prod", "vlogs"), instance("prod", "vlogs")],
        };
        assert!(matches!(doc.validate(&registry), Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn rejects_unknown_type() {
        let registry = registry_with(&["vlogs"]);
        let doc = IntegrationsDocument {
            schema_version: "v1".into(),
            instances: vec![instance("prod", "logzio")],
        };
        assert!(matches!(doc.validate(&registry), Err(ConfigError::UnknownType(_))));
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let registry = registry_with(&[]);
        let doc = IntegrationsDocument { schema_version: "v2".into(), instances: vec![] };
        assert!(matches!(doc.validate(&registry), Err(ConfigError::UnknownSchemaVersion(_))));
    }

    #[test]
    fn accepts_minimal_valid_document() {
        let registry = registry_with(&["vlogs"]);
        let doc = IntegrationsDocument { schema_version: "v1".into(), instances: vec![instance("prod", "vlogs")] };
        assert!(doc.validate(&registry).is_ok());
    }

    #[test]
    fn change_detection_by_name() {
        let a = instance("prod", "vlogs");
        let mut b = a.clone();
        assert!(!a.differs_from(&b));
        b.type_name = "logzio".into();
        assert!(a.differs_from(&b));
    }
}
