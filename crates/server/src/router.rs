use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use meridian_core::{
    auth::ClientState,
    runtime::GatewayRuntime,
    upstream::{NetworkDescriptor, UpstreamError},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the admin router over a started runtime.
pub fn create_router(runtime: Arc<GatewayRuntime>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/networks", get(handle_networks))
        .route("/networks/{name}", put(handle_apply_descriptor))
        .route("/sessions", get(handle_sessions))
        .with_state(runtime)
}

#[derive(Debug, Serialize)]
struct SessionClientStatus {
    name: String,
    state: ClientState,
    slots: usize,
    error: Option<String>,
}

/// Reports `200` when every network has at least one available provider, `503` otherwise.
pub async fn handle_health(State(runtime): State<Arc<GatewayRuntime>>) -> impl IntoResponse {
    let networks = runtime.registry().status();
    let degraded: Vec<&str> = networks
        .iter()
        .filter(|network| network.available_providers == 0)
        .map(|network| network.name.as_str())
        .collect();
    let healthy = degraded.is_empty();

    let health_status = serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "networks": {
            "total": networks.len(),
            "degraded": degraded,
        },
        "session_clients": runtime
            .session_clients()
            .iter()
            .filter(|client| client.error().is_none())
            .count(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    (
        if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE },
        [("content-type", "application/json")],
        serde_json::to_string(&health_status).unwrap_or_default(),
    )
}

pub async fn handle_metrics(State(runtime): State<Arc<GatewayRuntime>>) -> impl IntoResponse {
    match runtime.components().metrics_collector() {
        Some(collector) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            collector.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain; charset=utf-8")],
            "metrics disabled".to_string(),
        ),
    }
}

pub async fn handle_networks(State(runtime): State<Arc<GatewayRuntime>>) -> impl IntoResponse {
    Json(runtime.registry().status())
}

/// Replaces the provider set and health-check overrides of one network.
pub async fn handle_apply_descriptor(
    State(runtime): State<Arc<GatewayRuntime>>,
    Path(name): Path<String>,
    Json(descriptor): Json<NetworkDescriptor>,
) -> impl IntoResponse {
    match runtime.registry().apply_descriptor(&name, &descriptor).await {
        Ok(changes) => {
            info!(
                network = %name,
                added = changes.added,
                updated = changes.updated,
                removed = changes.removed,
                "network descriptor applied"
            );
            (StatusCode::OK, Json(serde_json::json!(changes)))
        }
        Err(e) => {
            warn!(network = %name, error = %e, "network descriptor rejected");
            let status = match e {
                UpstreamError::UnknownNetwork(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(serde_json::json!({ "error": e.to_string() })))
        }
    }
}

pub async fn handle_sessions(State(runtime): State<Arc<GatewayRuntime>>) -> impl IntoResponse {
    let clients: Vec<SessionClientStatus> = runtime
        .session_clients()
        .iter()
        .map(|client| SessionClientStatus {
            name: client.name().to_string(),
            state: client.state(),
            slots: client.slot_count(),
            error: client.error().map(|e| e.to_string()),
        })
        .collect();
    Json(clients)
}
