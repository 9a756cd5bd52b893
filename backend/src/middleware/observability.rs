use axum::{
    body::Body,
    extract::State,
    http::{Request, Response, StatusCode},
    middleware::Next,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::AppState;

/// Middleware layer for request observability
/// Logs method, normalized path, status and latency for every request
pub async fn observability_layer(request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        tracing::error!(%request_id, %method, path, status = status.as_u16(), elapsed_ms, "request failed");
    } else if status.is_client_error() {
        tracing::warn!(%request_id, %method, path, status = status.as_u16(), elapsed_ms, "request rejected");
    } else {
        tracing::info!(%request_id, %method, path, status = status.as_u16(), elapsed_ms, "request completed");
    }

    response
}

/// Normalize path to group similar endpoints (e.g., /workflow/rules/<uuid>/edges -> /workflow/rules/:id/edges)
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|s| {
            if Uuid::parse_str(s).is_ok() || s.parse::<i64>().is_ok() {
                ":id"
            } else {
                s
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Health check endpoint with store status
pub async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> Result<axum::Json<HealthCheckResponse>, StatusCode> {
    let started = Instant::now();
    let healthy = state.store.ping().await;
    let store_status = ServiceStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        response_time_ms: Some(started.elapsed().as_millis() as i32),
        details: None,
    };

    let dispatcher_status = ServiceStatus {
        status: "healthy".to_string(),
        response_time_ms: None,
        details: Some(serde_json::json!({
            "workers": state.dispatcher.worker_count(),
            "free_queue_slots": state.dispatcher.capacity(),
        })),
    };

    if !healthy {
        tracing::warn!("store health check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(axum::Json(HealthCheckResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: [
            ("store".to_string(), store_status),
            ("dispatcher".to_string(), dispatcher_status),
        ]
        .into_iter()
        .collect(),
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub services: std::collections::HashMap<String, ServiceStatus>,
}

#[derive(Debug, serde::Serialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: Option<i32>,
    pub details: Option<serde_json::Value>,
}
