//! Metrics/dashboard integration, modeled on a Prometheus-shaped query API.
//! Publishes a single `panels` tool that demonstrates the partial-result
//! contract: one panel's query failing never hides the panels that
//! succeeded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::InstanceConfig;
use crate::error::{FactoryError, LifecycleError, ToolError};
use crate::integration::{
    FactoryContext, HealthReport, IntegrationShell, ShellContext, ShellMetadata,
};
use crate::registry::Factory;
use crate::secret::SecretWatcher;
use crate::tools::{ToolHandler, ToolPort, ToolRecord, ToolResult};
use crate::version::Version;

#[derive(Debug, Deserialize)]
struct PromqSettings {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(default)]
    panels: Vec<PanelDef>,
}

#[derive(Debug, Clone, Deserialize)]
struct PanelDef {
    name: String,
    query: String,
}

struct PromqInner {
    base_url: String,
    http: reqwest::Client,
    secret: Option<Arc<dyn SecretWatcher>>,
    panels: Vec<PanelDef>,
}

pub struct PromqIntegration {
    name: String,
    version: Version,
    inner: Arc<PromqInner>,
}

/// Registers the `"promq"` factory into a [`crate::registry::FactoryRegistry`].
pub fn factory() -> Factory {
    Arc::new(|config: &InstanceConfig, ctx: FactoryContext| {
        let settings: PromqSettings = serde_json::from_value(config.settings.clone()).map_err(|e| {
            FactoryError::InvalidSettings { name: config.name.clone(), reason: e.to_string() }
        })?;
        if settings.base_url.is_empty() {
            return Err(FactoryError::InvalidSettings {
                name: config.name.clone(),
                reason: "baseUrl must not be empty".into(),
            });
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FactoryError::InvalidSettings { name: config.name.clone(), reason: e.to_string() })?;

        Ok(Box::new(PromqIntegration {
            name: config.name.clone(),
            version: Version::new(1, 0, 0),
            inner: Arc::new(PromqInner {
                base_url: settings.base_url,
                http,
                secret: ctx.secret,
                panels: settings.panels,
            }),
        }) as Box<dyn IntegrationShell>)
    })
}

#[async_trait]
impl IntegrationShell for PromqIntegration {
    fn metadata(&self) -> ShellMetadata {
        ShellMetadata {
            name: self.name.clone(),
            type_name: "promq".to_string(),
            version: self.version.clone(),
            description: "Dashboard panel queries over a Prometheus-shaped backend".to_string(),
        }
    }

    async fn start(&self, _ctx: ShellContext) -> Result<(), LifecycleError> {
        Ok(())
    }

    async fn stop(&self, _ctx: ShellContext) -> Result<(), LifecycleError> {
        Ok(())
    }

    async fn health(&self, ctx: ShellContext) -> HealthReport {
        if let Some(secret) = &self.inner.secret {
            if !secret.is_ready() {
                return HealthReport::degraded("secret watcher has no token yet");
            }
        }

        let probe = self.inner.http.get(format!("{}/-/healthy", self.inner.base_url)).send();
        match tokio::time::timeout(ctx.deadline, probe).await {
            Ok(Ok(response)) if response.status().is_success() => HealthReport::healthy(),
            Ok(Ok(response)) => HealthReport::degraded(format!("upstream returned {}", response.status())),
            Ok(Err(err)) => HealthReport::degraded(format!("upstream unreachable: {err}")),
            Err(_) => HealthReport::degraded("health probe timed out"),
        }
    }

    async fn register_tools(&self, port: &dyn ToolPort) -> Result<(), LifecycleError> {
        port.publish(ToolRecord {
            qualified_name: format!("promq_{}_panels", self.name),
            description: "Run every configured dashboard panel query; one panel failing does not hide the rest"
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "panels": {"type": "array", "items": {"type": "string"}},
                },
            }),
            handler: Arc::new(PanelsHandler { inner: self.inner.clone() }),
        });
        Ok(())
    }
}

struct PanelsHandler {
    inner: Arc<PromqInner>,
}

#[async_trait]
impl ToolHandler for PanelsHandler {
    async fn invoke(&self, parameters: Value) -> ToolResult {
        panels(&self.inner, parameters).await
    }
}

#[derive(Debug, Deserialize)]
struct PanelsParams {
    #[serde(default)]
    panels: Option<Vec<String>>,
}

async fn query_panel(inner: &PromqInner, panel: &PanelDef) -> Result<Value, ToolError> {
    let token = match &inner.secret {
        Some(secret) => match secret.current_token() {
            Some(token) => Some(token),
            None => return Err(ToolError::SecretUnavailable),
        },
        None => None,
    };

    let mut request = inner
        .http
        .get(format!("{}/api/v1/query", inner.base_url))
        .query(&[("query", panel.query.as_str())]);
    if let Some(token) = &token {
        request = request.bearer_auth(token.expose());
    }

    let response = request.send().await.map_err(|e| ToolError::Upstream(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ToolError::Upstream(format!("upstream returned {}", response.status())));
    }
    response.json::<Value>().await.map_err(|e| ToolError::Upstream(e.to_string()))
}

/// Runs every selected panel independently: a failing panel is recorded in
/// `errors` and never prevents the panels that succeeded from being
/// returned.
async fn panels(inner: &PromqInner, parameters: Value) -> ToolResult {
    let params: PanelsParams =
        serde_json::from_value(parameters).map_err(|e| ToolError::InvalidInput(e.to_string()))?;

    let selected: Vec<&PanelDef> = match &params.panels {
        Some(names) => inner.panels.iter().filter(|p| names.contains(&p.name)).collect(),
        None => inner.panels.iter().collect(),
    };

    if selected.is_empty() {
        return Err(ToolError::InvalidInput("no matching panels configured".into()));
    }

    let mut results = serde_json::Map::new();
    let mut errors = serde_json::Map::new();
    for panel in selected {
        match query_panel(inner, panel).await {
            Ok(value) => {
                results.insert(panel.name.clone(), value);
            }
            Err(err) => {
                errors.insert(panel.name.clone(), json!(err.to_string()));
            }
        }
    }

    Ok(json!({"panels": results, "errors": errors}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_empty_base_url() {
        let config = InstanceConfig {
            name: "grid".into(),
            type_name: "promq".into(),
            min_version: None,
            settings: json!({"baseUrl": ""}),
        };
        let ctx = FactoryContext { http: reqwest::Client::new(), secret: None };
        assert!(matches!(factory()(&config, ctx), Err(FactoryError::InvalidSettings { .. })));
    }

    #[test]
    fn factory_builds_with_panels_configured() {
        let config = InstanceConfig {
            name: "grid".into(),
            type_name: "promq".into(),
            min_version: None,
            settings: json!({
                "baseUrl": "https://prom.internal",
                "panels": [
                    {"name": "latency_p99", "query": "histogram_quantile(0.99, rate(http_request_duration_seconds_bucket[5m]))"},
                    {"name": "error_rate", "query": "rate(http_requests_total{code=~\"5..\"}[5m])"},
                ],
            }),
        };
        let ctx = FactoryContext { http: reqwest::Client::new(), secret: None };
        let shell = factory()(&config, ctx).unwrap();
        assert_eq!(shell.metadata().type_name, "promq");
    }

    #[tokio::test]
    async fn empty_panel_selection_is_an_invalid_input_error() {
        let inner = Arc::new(PromqInner {
            base_url: "https://prom.internal".into(),
            http: reqwest::Client::new(),
            secret: None,
            panels: vec![PanelDef { name: "latency".into(), query: "up".into() }],
        });
        let err = panels(&inner, json!({"panels": ["does_not_exist"]})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
