//! `ToolPort`: the port integrations use to publish/unpublish tool
//! descriptors and handlers, and the dispatcher the HTTP surface calls
//! into for `POST /v1/tools/invoke`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::ToolError;

pub type ToolResult = Result<Value, ToolError>;

/// A callable action published under a qualified name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, parameters: Value) -> ToolResult;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ToolResult> + Send,
{
    async fn invoke(&self, parameters: Value) -> ToolResult {
        (self)(parameters).await
    }
}

#[derive(Clone)]
pub struct ToolRecord {
    /// `{type}_{instance}_{action}`, e.g. `vlogs_prod_overview`.
    pub qualified_name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRecord")
            .field("qualified_name", &self.qualified_name)
            .field("description", &self.description)
            .finish()
    }
}

/// Publish/unpublish port. Both operations are idempotent.
#[async_trait]
pub trait ToolPort: Send + Sync {
    fn publish(&self, record: ToolRecord);
    fn unpublish(&self, qualified_name: &str);
    fn list(&self) -> Vec<ToolRecord>;
    async fn dispatch(&self, qualified_name: &str, parameters: Value) -> ToolResult;

    /// Unpublish every record whose `qualifiedName` starts with `prefix`.
    /// Used by the reconciler to drop one instance's whole tool set by its
    /// `{type}_{instance}_` prefix convention without tracking names itself.
    fn unpublish_prefix(&self, prefix: &str) {
        for record in self.list() {
            if record.qualified_name.starts_with(prefix) {
                self.unpublish(&record.qualified_name);
            }
        }
    }
}

/// In-process implementation backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryToolPort {
    records: DashMap<String, ToolRecord>,
}

impl InMemoryToolPort {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolPort for InMemoryToolPort {
    fn publish(&self, record: ToolRecord) {
        self.records.insert(record.qualified_name.clone(), record);
    }

    fn unpublish(&self, qualified_name: &str) {
        self.records.remove(qualified_name);
    }

    fn list(&self) -> Vec<ToolRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    async fn dispatch(&self, qualified_name: &str, parameters: Value) -> ToolResult {
        let record = self
            .records
            .get(qualified_name)
            .ok_or_else(|| ToolError::NotPublished(qualified_name.to_string()))?
            .clone();
        record.handler.invoke(parameters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> ToolRecord {
        ToolRecord {
            qualified_name: name.to_string(),
            description: "test tool".into(),
            input_schema: json!({}),
            handler: Arc::new(|_params: Value| async move { Ok(json!({"ok": true})) }),
        }
    }

    #[tokio::test]
    async fn publish_then_unpublish_is_idempotent_and_restores_initial_state() {
        let port = InMemoryToolPort::new();
        assert!(port.list().is_empty());

        port.publish(record("vlogs_prod_overview"));
        port.publish(record("vlogs_prod_overview")); // overwrite is a no-op on the set of names
        assert_eq!(port.list().len(), 1);

        port.unpublish("vlogs_prod_overview");
        port.unpublish("vlogs_prod_overview"); // missing name is not an error
        assert!(port.list().is_empty());
    }

    #[tokio::test]
    async fn dispatch_routes_to_the_right_handler() {
        let port = InMemoryToolPort::new();
        port.publish(record("vlogs_prod_overview"));

        let result = port.dispatch("vlogs_prod_overview", json!({})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));

        let err = port.dispatch("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotPublished(_)));
    }

    #[test]
    fn unpublish_prefix_clears_one_instances_tools_only() {
        let port = InMemoryToolPort::new();
        port.publish(record("vlogs_prod_overview"));
        port.publish(record("vlogs_prod_patterns"));
        port.publish(record("vlogs_staging_overview"));

        port.unpublish_prefix("vlogs_prod_");
        let remaining: Vec<_> = port.list().into_iter().map(|r| r.qualified_name).collect();
        assert_eq!(remaining, vec!["vlogs_staging_overview".to_string()]);
    }
}
