//! Log-store integration, modeled on a VictoriaLogs-shaped query API.
//! Publishes `overview`, `patterns`, and `logs` under the
//! `vlogs_{instance}_{action}` convention.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::InstanceConfig;
use crate::error::{FactoryError, LifecycleError, ToolError};
use crate::integration::{
    FactoryContext, HealthReport, IntegrationShell, ShellContext, ShellMetadata,
};
use crate::registry::Factory;
use crate::secret::SecretWatcher;
use crate::templates::{compare_windows, LogTemplate, TemplateStore, TemplateStoreConfig};
use crate::tools::{ToolHandler, ToolPort, ToolRecord, ToolResult};
use crate::version::Version;

use super::{parse_window_minutes, reject_leading_wildcard};

const PATTERN_CAP: usize = 50;
const LOGS_CAP: usize = 500;

#[derive(Debug, Deserialize)]
struct VlogsSettings {
    #[serde(rename = "baseUrl")]
    base_url: String,
}

struct VlogsInner {
    base_url: String,
    http: reqwest::Client,
    secret: Option<Arc<dyn SecretWatcher>>,
    templates: TemplateStore,
}

pub struct VlogsIntegration {
    name: String,
    version: Version,
    inner: Arc<VlogsInner>,
}

/// Registers the `"vlogs"` factory into a [`crate::registry::FactoryRegistry`].
pub fn factory() -> Factory {
    Arc::new(|config: &InstanceConfig, ctx: FactoryContext| {
        let settings: VlogsSettings = serde_json::from_value(config.settings.clone()).map_err(|e| {
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

        Ok(Box::new(VlogsIntegration {
            name: config.name.clone(),
            version: Version::new(1, 0, 0),
            inner: Arc::new(VlogsInner {
                base_url: settings.base_url,
                http,
                secret: ctx.secret,
                templates: TemplateStore::new(TemplateStoreConfig::default()),
            }),
        }) as Box<dyn IntegrationShell>)
    })
}

#[async_trait]
impl IntegrationShell for VlogsIntegration {
    fn metadata(&self) -> ShellMetadata {
        ShellMetadata {
            name: self.name.clone(),
            type_name: "vlogs".to_string(),
            version: self.version.clone(),
            description: "Log search and pattern clustering over a VictoriaLogs-shaped backend".to_string(),
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

        let probe = self.inner.http.get(format!("{}/health", self.inner.base_url)).send();
        match tokio::time::timeout(ctx.deadline, probe).await {
            Ok(Ok(response)) if response.status().is_success() => HealthReport::healthy(),
            Ok(Ok(response)) => HealthReport::degraded(format!("upstream returned {}", response.status())),
            Ok(Err(err)) => HealthReport::degraded(format!("upstream unreachable: {err}")),
            Err(_) => HealthReport::degraded("health probe timed out"),
        }
    }

    async fn register_tools(&self, port: &dyn ToolPort) -> Result<(), LifecycleError> {
        let prefix = format!("vlogs_{}_", self.name);
        port.publish(ToolRecord {
            qualified_name: format!("{prefix}overview"),
            description: "Summarize error/warning counts per namespace over a recent window".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "namespace": {"type": "string"},
                    "windowMinutes": {"type": "integer", "minimum": 15},
                },
            }),
            handler: Arc::new(VlogsToolHandler { inner: self.inner.clone(), action: VlogsAction::Overview }),
        });
        port.publish(ToolRecord {
            qualified_name: format!("{prefix}patterns"),
            description: "Cluster recent log lines into templates and flag novel ones".into(),
            input_schema: json!({
                "type": "object",
                "required": ["namespace"],
                "properties": {
                    "namespace": {"type": "string"},
                    "windowMinutes": {"type": "integer", "minimum": 15},
                },
            }),
            handler: Arc::new(VlogsToolHandler { inner: self.inner.clone(), action: VlogsAction::Patterns }),
        });
        port.publish(ToolRecord {
            qualified_name: format!("{prefix}logs"),
            description: "Fetch raw log lines for a namespace, optionally filtered".into(),
            input_schema: json!({
                "type": "object",
                "required": ["namespace"],
                "properties": {
                    "namespace": {"type": "string"},
                    "pod": {"type": "string"},
                    "container": {"type": "string"},
                    "level": {"type": "string"},
                    "windowMinutes": {"type": "integer", "minimum": 15},
                    "limit": {"type": "integer", "maximum": 500},
                },
            }),
            handler: Arc::new(VlogsToolHandler { inner: self.inner.clone(), action: VlogsAction::Logs }),
        });
        Ok(())
    }
}

enum VlogsAction {
    Overview,
    Patterns,
    Logs,
}

struct VlogsToolHandler {
    inner: Arc<VlogsInner>,
    action: VlogsAction,
}

#[async_trait]
impl ToolHandler for VlogsToolHandler {
    async fn invoke(&self, parameters: Value) -> ToolResult {
        match self.action {
            VlogsAction::Overview => overview(&self.inner, parameters).await,
            VlogsAction::Patterns => patterns(&self.inner, parameters).await,
            VlogsAction::Logs => logs(&self.inner, parameters).await,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawLine {
    #[serde(rename = "_time")]
    time: DateTime<Utc>,
    #[serde(rename = "_msg")]
    message: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    level: Option<String>,
}

async fn fetch_lines(
    inner: &VlogsInner,
    namespace: Option<&str>,
    extra_filters: &[(&str, &str)],
    window: Duration,
    end: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<RawLine>, ToolError> {
    let token = match &inner.secret {
        Some(secret) => match secret.current_token() {
            Some(token) => Some(token),
            None => return Err(ToolError::SecretUnavailable),
        },
        None => None,
    };

    let start = end - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
    let mut query = format!("_time:[{}, {}]", start.to_rfc3339(), end.to_rfc3339());
    if let Some(ns) = namespace {
        query.push_str(&format!(" AND namespace:\"{ns}\""));
    }
    for (field, value) in extra_filters {
        query.push_str(&format!(" AND {field}:\"{value}\""));
    }

    let limit_str = limit.to_string();
    let mut request = inner
        .http
        .get(format!("{}/select/logsql/query", inner.base_url))
        .query(&[("query", query.as_str()), ("limit", limit_str.as_str())]);
    if let Some(token) = &token {
        request = request.bearer_auth(token.expose());
    }

    let response = request.send().await.map_err(|e| ToolError::Upstream(e.to_string()))?;
    if !response.status().is_success() {
        return Err(ToolError::Upstream(format!("upstream returned {}", response.status())));
    }

    let body = response.text().await.map_err(|e| ToolError::Upstream(e.to_string()))?;
    let mut lines = Vec::new();
    for raw in body.lines() {
        if raw.trim().is_empty() {
            continue;
        }
        let parsed: RawLine = serde_json::from_str(raw)
            .map_err(|e| ToolError::Upstream(format!("malformed upstream record: {e}")))?;
        lines.push(parsed);
    }
    Ok(lines)
}

#[derive(Debug, Deserialize)]
struct OverviewParams {
    namespace: Option<String>,
    #[serde(rename = "windowMinutes")]
    window_minutes: Option<u64>,
}

async fn overview(inner: &VlogsInner, parameters: Value) -> ToolResult {
    let params: OverviewParams =
        serde_json::from_value(parameters).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
    let window = parse_window_minutes(params.window_minutes)?;

    let lines = fetch_lines(inner, params.namespace.as_deref(), &[], window, Utc::now(), LOGS_CAP).await?;

    let mut namespaces: std::collections::HashMap<String, (u64, u64, u64)> = std::collections::HashMap::new();
    for line in &lines {
        let ns = line.namespace.clone().unwrap_or_else(|| "unknown".to_string());
        let entry = namespaces.entry(ns).or_insert((0, 0, 0));
        entry.2 += 1;
        match line.level.as_deref().map(str::to_lowercase).as_deref() {
            Some("error") | Some("critical") | Some("fatal") => entry.0 += 1,
            Some("warn") | Some("warning") => entry.1 += 1,
            _ => {}
        }
    }

    let body: Value = namespaces
        .into_iter()
        .map(|(name, (errors, warnings, total))| {
            (name, json!({"errors": errors, "warnings": warnings, "total": total}))
        })
        .collect::<serde_json::Map<_, _>>()
        .into();

    Ok(json!({"windowMinutes": window.as_secs() / 60, "namespaces": body}))
}

#[derive(Debug, Deserialize)]
struct PatternsParams {
    namespace: String,
    #[serde(rename = "windowMinutes")]
    window_minutes: Option<u64>,
}

fn template_summary(template: &LogTemplate, novel: bool) -> Value {
    json!({
        "id": template.id,
        "count": template.count,
        "example": template.example,
        "novel": novel,
    })
}

async fn patterns(inner: &VlogsInner, parameters: Value) -> ToolResult {
    let params: PatternsParams =
        serde_json::from_value(parameters).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
    let window = parse_window_minutes(params.window_minutes)?;

    let now = Utc::now();
    let current_lines = fetch_lines(inner, Some(&params.namespace), &[], window, now, LOGS_CAP * 2).await?;
    let current: Vec<String> = current_lines.into_iter().map(|l| l.message).collect();
    let current_refs: Vec<&str> = current.iter().map(String::as_str).collect();
    let current_templates = inner.templates.ingest_window(current_refs);

    let previous_end = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
    let previous_attempt =
        fetch_lines(inner, Some(&params.namespace), &[], window, previous_end, LOGS_CAP * 2).await;
    let (previous_templates, degraded_note) = match previous_attempt {
        Ok(previous_lines) => {
            let previous: Vec<String> = previous_lines.into_iter().map(|l| l.message).collect();
            let previous_refs: Vec<&str> = previous.iter().map(String::as_str).collect();
            (inner.templates.ingest_window(previous_refs), None)
        }
        Err(err) => (Vec::new(), Some(err.to_string())),
    };

    let novelty = compare_windows(&current_templates, &previous_templates);

    let mut ranked = current_templates.clone();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(PATTERN_CAP);

    let dropped = current_templates.len().saturating_sub(ranked.len());
    let templates: Vec<Value> = ranked
        .iter()
        .map(|t| {
            let novel = if degraded_note.is_some() { true } else { *novelty.get(&t.id).unwrap_or(&true) };
            template_summary(t, novel)
        })
        .collect();

    let mut result = json!({
        "windowMinutes": window.as_secs() / 60,
        "templates": templates,
        "droppedBeyondCap": dropped,
    });
    if let Some(note) = degraded_note {
        result["degraded"] = json!(true);
        result["degradedReason"] = json!(format!("previous window unavailable, novelty defaulted to true: {note}"));
    }
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct LogsParams {
    namespace: String,
    pod: Option<String>,
    container: Option<String>,
    level: Option<String>,
    #[serde(rename = "windowMinutes")]
    window_minutes: Option<u64>,
    limit: Option<usize>,
}

async fn logs(inner: &VlogsInner, parameters: Value) -> ToolResult {
    let params: LogsParams =
        serde_json::from_value(parameters).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
    let window = parse_window_minutes(params.window_minutes)?;

    for field in [&params.pod, &params.container, &params.level] {
        if let Some(value) = field {
            reject_leading_wildcard(value)?;
        }
    }

    let limit = params.limit.unwrap_or(LOGS_CAP).min(LOGS_CAP);

    let mut filters: Vec<(&str, &str)> = Vec::new();
    if let Some(pod) = &params.pod {
        filters.push(("pod", pod));
    }
    if let Some(container) = &params.container {
        filters.push(("container", container));
    }
    if let Some(level) = &params.level {
        filters.push(("level", level));
    }

    let lines = fetch_lines(inner, Some(&params.namespace), &filters, window, Utc::now(), limit).await?;
    let body: Vec<Value> = lines
        .into_iter()
        .map(|l| json!({"time": l.time, "namespace": l.namespace, "level": l.level, "message": l.message}))
        .collect();

    Ok(json!({"lines": body}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_rejects_too_small_a_window() {
        let parameters = json!({"windowMinutes": 5});
        let result: Result<OverviewParams, _> = serde_json::from_value(parameters);
        let params = result.unwrap();
        assert!(matches!(parse_window_minutes(params.window_minutes), Err(ToolError::WindowTooSmall)));
    }

    #[test]
    fn logs_rejects_a_leading_wildcard_pod_filter() {
        let params: LogsParams = serde_json::from_value(json!({
            "namespace": "checkout",
            "pod": "*worker",
        }))
        .unwrap();
        assert!(matches!(reject_leading_wildcard(params.pod.as_deref().unwrap()), Err(ToolError::LeadingWildcardRejected)));
    }

    #[test]
    fn overview_classifies_lines_by_level_and_namespace() {
        let lines = vec![
            RawLine { time: Utc::now(), message: "boom".into(), namespace: Some("checkout".into()), level: Some("error".into()) },
            RawLine { time: Utc::now(), message: "slow query".into(), namespace: Some("checkout".into()), level: Some("warn".into()) },
            RawLine { time: Utc::now(), message: "ok".into(), namespace: Some("checkout".into()), level: Some("info".into()) },
        ];
        let mut namespaces: std::collections::HashMap<String, (u64, u64, u64)> = std::collections::HashMap::new();
        for line in &lines {
            let ns = line.namespace.clone().unwrap();
            let entry = namespaces.entry(ns).or_insert((0, 0, 0));
            entry.2 += 1;
            match line.level.as_deref() {
                Some("error") => entry.0 += 1,
                Some("warn") => entry.1 += 1,
                _ => {}
            }
        }
        let (errors, warnings, total) = namespaces["checkout"];
        assert_eq!((errors, warnings, total), (1, 1, 3));
    }

    #[test]
    fn factory_rejects_empty_base_url() {
        let config = InstanceConfig {
            name: "prod".into(),
            type_name: "vlogs".into(),
            min_version: None,
            settings: json!({"baseUrl": ""}),
        };
        let ctx = FactoryContext { http: reqwest::Client::new(), secret: None };
        let built = factory()(&config, ctx);
        assert!(matches!(built, Err(FactoryError::InvalidSettings { .. })));
    }

    #[test]
    fn factory_rejects_missing_base_url_field() {
        let config = InstanceConfig {
            name: "prod".into(),
            type_name: "vlogs".into(),
            min_version: None,
            settings: json!({}),
        };
        let ctx = FactoryContext { http: reqwest::Client::new(), secret: None };
        let built = factory()(&config, ctx);
        assert!(matches!(built, Err(FactoryError::InvalidSettings { .. })));
    }

    #[test]
    fn factory_builds_with_a_valid_base_url() {
        let config = InstanceConfig {
            name: "prod".into(),
            type_name: "vlogs".into(),
            min_version: None,
            settings: json!({"baseUrl": "https://logs.internal"}),
        };
        let ctx = FactoryContext { http: reqwest::Client::new(), secret: None };
        let shell = factory()(&config, ctx).unwrap();
        let metadata = shell.metadata();
        assert_eq!(metadata.name, "prod");
        assert_eq!(metadata.type_name, "vlogs");
    }
}
