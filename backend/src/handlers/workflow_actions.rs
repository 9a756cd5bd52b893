//! Manual action execution and status polling

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use ruleflow_shared::{ActionExecution, ExecutionStatus};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::auth::rbac::{TableOp, WorkflowTable};
use crate::workflows::{ActionTypeDescriptor, ExecuteRequest, ExecuteResponse};
use crate::{ApiResult, AppState};

pub fn workflow_action_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_available_actions))
        .route("/:action_type/execute", post(execute_action))
}

pub fn workflow_execution_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id", get(get_execution_status))
}

async fn list_available_actions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<ActionTypeDescriptor>>> {
    Ok(Json(state.executions.list_available(&user).await?))
}

/// Sync types answer 200 with the outcome; async types answer 202 and are polled
async fn execute_action(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(action_type): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<(StatusCode, Json<ExecuteResponse>)> {
    let response = state.executions.execute(&action_type, request, &user).await?;

    let status = if response.status == ExecutionStatus::Pending {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

async fn get_execution_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<ActionExecution>> {
    let execution = state.executions.get_execution_status(execution_id).await?;

    // Callers may always poll their own executions
    if execution.requested_by != Some(user.user_id) {
        state
            .permissions
            .require(&user, WorkflowTable::ActionExecutions, TableOp::Read)
            .await?;
    }
    Ok(Json(execution))
}
