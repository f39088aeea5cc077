//! Diffing one desired `IntegrationsDocument` against the running set:
//! validate, then classify each name as added, removed, changed, or
//! unchanged.

use crate::config::{InstanceConfig, IntegrationsDocument};

#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub added: Vec<InstanceConfig>,
    pub removed: Vec<String>,
    pub changed: Vec<InstanceConfig>,
    pub unchanged: Vec<String>,
}

/// `previous` is `None` on first boot: everything in `desired` counts as added.
pub fn diff(previous: Option<&IntegrationsDocument>, desired: &IntegrationsDocument) -> Diff {
    let mut result = Diff { added: Vec::new(), removed: Vec::new(), changed: Vec::new(), unchanged: Vec::new() };

    let empty = IntegrationsDocument::empty();
    let previous = previous.unwrap_or(&empty);

    for instance in &desired.instances {
        match previous.get(&instance.name) {
            None => result.added.push(instance.clone()),
            Some(old) if old.differs_from(instance) => result.changed.push(instance.clone()),
            Some(_) => result.unchanged.push(instance.name.clone()),
        }
    }

    for old in &previous.instances {
        if desired.get(&old.name).is_none() {
            result.removed.push(old.name.clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(name: &str, type_name: &str) -> InstanceConfig {
        InstanceConfig { name: name.into(), type_name: type_name.into(), min_version: None, settings: json!({}) }
    }

    fn doc(instances: Vec<InstanceConfig>) -> IntegrationsDocument {
        IntegrationsDocument { schema_version: "v1".into(), instances }
    }

    #[test]
    fn first_boot_treats_everything_as_added() {
        let desired = doc(vec![instance("prod", "vlogs")]);
        let result = diff(None, &desired);
        assert_eq!(result.added.len(), 1);
        assert!(result.removed.is_empty());
        assert!(result.changed.is_empty());
    }

    #[test]
    fn removed_name_is_diffed_out() {
        let previous = doc(vec![instance("prod", "vlogs"), instance("staging", "vlogs")]);
        let desired = doc(vec![instance("prod", "vlogs")]);
        let result = diff(Some(&previous), &desired);
        assert_eq!(result.removed, vec!["staging".to_string()]);
        assert_eq!(result.unchanged, vec!["prod".to_string()]);
    }

    #[test]
    fn changed_settings_count_as_changed_not_unchanged() {
        let previous = doc(vec![instance("prod", "vlogs")]);
        let mut edited = instance("prod", "vlogs");
        edited.settings = json!({"baseUrl": "https://example.test"});
        let desired = doc(vec![edited]);

        let result = diff(Some(&previous), &desired);
        assert_eq!(result.changed.len(), 1);
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn identical_document_yields_only_unchanged() {
        let previous = doc(vec![instance("prod", "vlogs")]);
        let desired = previous.clone();
        let result = diff(Some(&previous), &desired);
        assert_eq!(result.unchanged, vec!["prod".to_string()]);
        assert!(result.added.is_empty() && result.removed.is_empty() && result.changed.is_empty());
    }
}
