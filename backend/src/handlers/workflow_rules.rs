//! Workflow Rule Handlers
//!
//! Full-graph create/replace (with dry run), read, delete, duplicate and
//! preview of automation rules.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use ruleflow_shared::{AutomationRule, WorkflowGraph};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::auth::rbac::{TableOp, WorkflowTable, GRAPH_CREATE, GRAPH_READ, GRAPH_REPLACE, RULES_READ};
use crate::workflows::orchestrator::PreviewResponse;
use crate::workflows::{SaveWorkflowRequest, SaveWorkflowResponse};
use crate::{ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct SaveQuery {
    #[serde(default)]
    pub dry_run: bool,
}

// ==================== Routes ====================

pub fn workflow_rule_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_rules))
        .route("/full", post(create_workflow))
        .route("/preview", post(preview_new_workflow))
        .route("/:id", delete(delete_rule))
        .route("/:id/full", get(get_workflow).put(update_workflow))
        .route("/:id/duplicate", post(duplicate_workflow))
        .route("/:id/preview", post(preview_workflow))
}

// ==================== Handlers ====================

async fn list_rules(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<AutomationRule>>> {
    state.permissions.require_all(&user, RULES_READ).await?;

    Ok(Json(state.orchestrator.list_rules().await?))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<SaveQuery>,
    Json(request): Json<SaveWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<SaveWorkflowResponse>)> {
    if query.dry_run {
        state.permissions.require_all(&user, RULES_READ).await?;
    } else {
        state.permissions.require_all(&user, GRAPH_CREATE).await?;
    }

    let response = state
        .orchestrator
        .save(None, request, query.dry_run, Some(user.user_id))
        .await?;

    let status = if response.workflow.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
    Query(query): Query<SaveQuery>,
    Json(request): Json<SaveWorkflowRequest>,
) -> ApiResult<Json<SaveWorkflowResponse>> {
    if query.dry_run {
        state.permissions.require_all(&user, RULES_READ).await?;
    } else {
        state.permissions.require_all(&user, GRAPH_REPLACE).await?;
    }

    let response = state
        .orchestrator
        .save(Some(rule_id), request, query.dry_run, Some(user.user_id))
        .await?;
    Ok(Json(response))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowGraph>> {
    state.permissions.require_all(&user, GRAPH_READ).await?;

    Ok(Json(state.orchestrator.get_workflow(rule_id).await?))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .permissions
        .require(&user, WorkflowTable::AutomationRules, TableOp::Delete)
        .await?;

    state.orchestrator.delete_rule(rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn duplicate_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<WorkflowGraph>)> {
    state.permissions.require_all(&user, GRAPH_READ).await?;
    state.permissions.require_all(&user, GRAPH_CREATE).await?;

    let copy = state.orchestrator.duplicate(rule_id, Some(user.user_id)).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

async fn preview_new_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<SaveWorkflowRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    state.permissions.require_all(&user, RULES_READ).await?;

    Ok(Json(state.orchestrator.preview(None, &request).await?))
}

async fn preview_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<SaveWorkflowRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    state.permissions.require_all(&user, GRAPH_READ).await?;

    Ok(Json(state.orchestrator.preview(Some(rule_id), &request).await?))
}
