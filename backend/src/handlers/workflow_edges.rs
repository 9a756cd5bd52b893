//! Incremental edge CRUD for a single rule

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get},
    Router,
};
use ruleflow_shared::ActionEdge;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::auth::rbac::{TableOp, WorkflowTable};
use crate::workflows::CreateEdgeRequest;
use crate::{ApiResult, AppState};

pub fn workflow_edge_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/edges", get(list_edges).post(create_edge))
        .route("/:id/edges/:edge_id", delete(delete_edge))
        .route("/:id/edges-all", delete(delete_all_edges))
}

async fn list_edges(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ActionEdge>>> {
    state
        .permissions
        .require(&user, WorkflowTable::ActionEdges, TableOp::Read)
        .await?;

    Ok(Json(state.orchestrator.list_edges(rule_id).await?))
}

async fn create_edge(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<CreateEdgeRequest>,
) -> ApiResult<(StatusCode, Json<ActionEdge>)> {
    state
        .permissions
        .require(&user, WorkflowTable::ActionEdges, TableOp::Create)
        .await?;

    let edge = state.orchestrator.create_edge(rule_id, request).await?;
    Ok((StatusCode::CREATED, Json(edge)))
}

async fn delete_edge(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path((rule_id, edge_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .permissions
        .require(&user, WorkflowTable::ActionEdges, TableOp::Delete)
        .await?;

    state.orchestrator.delete_edge(rule_id, edge_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_all_edges(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .permissions
        .require(&user, WorkflowTable::ActionEdges, TableOp::Delete)
        .await?;

    let deleted = state.orchestrator.delete_all_edges(rule_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
