//! Thin `axum` HTTP surface: health/metrics, config CRUD, and tool
//! invocation dispatch. Every handler here is a thin adapter; business rules
//! live in `ConfigStore`, `LifecycleManager`, and `ToolPort`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::InstanceConfig;
use crate::error::{ConfigError, LifecycleError, ToolError};
use crate::integration::{FactoryContext, HealthReport, IntegrationShell, LifecycleState, ShellContext};
use crate::lifecycle::LifecycleManager;
use crate::telemetry::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/v1/integrations", get(list_integrations).post(create_integration))
        .route(
            "/v1/integrations/:name",
            axum::routing::put(update_integration).delete(delete_integration),
        )
        .route("/v1/integrations/:name/test", post(test_integration))
        .route("/v1/tools/invoke", post(invoke_tool))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state.metrics.refresh(&state.manager.instances(), state.manager.tools().as_ref());
    state.metrics.render().map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Debug, Serialize)]
struct IntegrationView {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(rename = "minVersion", skip_serializing_if = "Option::is_none")]
    min_version: Option<String>,
    settings: Value,
    state: Option<LifecycleState>,
    health: Option<HealthReport>,
}

fn enrich(config: InstanceConfig, manager: &LifecycleManager) -> IntegrationView {
    let handle = manager.instances().get(&config.name);
    IntegrationView {
        name: config.name,
        type_name: config.type_name,
        min_version: config.min_version,
        settings: config.settings,
        state: handle.as_ref().map(|h| h.state()),
        health: handle.map(|h| (*h.health()).clone()),
    }
}

async fn list_integrations(State(state): State<AppState>) -> Result<Json<Vec<IntegrationView>>, ApiError> {
    let document = state.manager.config_store().load(&state.manager.factories()).await?;
    let views = document.instances.into_iter().map(|i| enrich(i, &state.manager)).collect();
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
struct UpsertIntegrationBody {
    name: Option<String>,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(rename = "minVersion", default)]
    min_version: Option<String>,
    #[serde(default)]
    settings: Value,
}

async fn create_integration(
    State(state): State<AppState>,
    Json(body): Json<UpsertIntegrationBody>,
) -> Result<Json<IntegrationView>, ApiError> {
    let name = body.name.ok_or_else(|| ApiError::BadRequest("name is required".into()))?;
    let mut document = state.manager.config_store().load(&state.manager.factories()).await?;
    if document.get(&name).is_some() {
        return Err(ApiError::BadRequest(format!("integration already exists: {name}")));
    }

    let config = InstanceConfig { name, type_name: body.type_name, min_version: body.min_version, settings: body.settings };
    document.instances.push(config.clone());
    document.validate(&state.manager.factories())?;
    state.manager.config_store().write(&document).await?;
    state.manager.request_reconcile(document);

    Ok(Json(enrich(config, &state.manager)))
}

async fn update_integration(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpsertIntegrationBody>,
) -> Result<Json<IntegrationView>, ApiError> {
    let mut document = state.manager.config_store().load(&state.manager.factories()).await?;
    let Some(slot) = document.instances.iter_mut().find(|i| i.name == name) else {
        return Err(ApiError::NotFound(name));
    };
    slot.type_name = body.type_name;
    slot.min_version = body.min_version;
    slot.settings = body.settings;
    let updated = slot.clone();

    document.validate(&state.manager.factories())?;
    state.manager.config_store().write(&document).await?;
    state.manager.request_reconcile(document);

    Ok(Json(enrich(updated, &state.manager)))
}

async fn delete_integration(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    let mut document = state.manager.config_store().load(&state.manager.factories()).await?;
    let before = document.instances.len();
    document.instances.retain(|i| i.name != name);
    if document.instances.len() == before {
        return Err(ApiError::NotFound(name));
    }

    state.manager.config_store().write(&document).await?;
    state.manager.request_reconcile(document);
    Ok(StatusCode::NO_CONTENT)
}

async fn test_integration(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpsertIntegrationBody>,
) -> Result<Json<HealthReport>, ApiError> {
    let factory = state
        .manager
        .factories()
        .lookup(&body.type_name)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let candidate = InstanceConfig { name, type_name: body.type_name, min_version: body.min_version, settings: body.settings };
    let factory_ctx = FactoryContext { http: reqwest::Client::new(), secret: None };
    let shell: Box<dyn IntegrationShell> =
        factory(&candidate, factory_ctx).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let ctx = ShellContext::new(std::time::Duration::from_secs(5), reqwest::Client::new());
    Ok(Json(shell.health(ctx).await))
}

#[derive(Debug, Deserialize)]
struct InvokeToolBody {
    #[serde(rename = "qualifiedName")]
    qualified_name: String,
    #[serde(default)]
    parameters: Value,
}

async fn invoke_tool(
    State(state): State<AppState>,
    Json(body): Json<InvokeToolBody>,
) -> Result<Json<Value>, ApiError> {
    let result = state.manager.tools().dispatch(&body.qualified_name, body.parameters).await;
    match result {
        Ok(value) => Ok(Json(json!({"ok": value}))),
        Err(err) => Err(ApiError::Tool(err)),
    }
}

enum ApiError {
    Config(ConfigError),
    Tool(ToolError),
    Lifecycle(LifecycleError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err)
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        ApiError::Lifecycle(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Config(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Lifecycle(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Tool(e) => {
                let status = match e {
                    ToolError::NotPublished(_) => StatusCode::NOT_FOUND,
                    ToolError::SecretUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    ToolError::Upstream(_) => StatusCode::BAD_GATEWAY,
                    ToolError::InvalidInput(_) | ToolError::LeadingWildcardRejected | ToolError::WindowTooSmall => {
                        StatusCode::BAD_REQUEST
                    }
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(name) => (StatusCode::NOT_FOUND, format!("unknown integration: {name}")),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}
