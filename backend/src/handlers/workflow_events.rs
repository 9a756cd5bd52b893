//! Change-event intake for out-of-process domains, and the dead-letter view

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use ruleflow_shared::{ChangeEvent, DeadLetter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::auth::rbac::{TableOp, WorkflowTable};
use crate::workflows::DispatchOutcome;
use crate::{ApiResult, AppError, AppState};

const MAX_DEAD_LETTER_PAGE: i64 = 500;

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub event_id: Uuid,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<i64>,
}

pub fn workflow_event_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(publish_event))
        .route("/dead-letters", get(list_dead_letters))
}

/// Hand an event to the dispatcher. Always 202: an event that cannot be
/// queued is dead-lettered rather than refused.
async fn publish_event(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(event): Json<ChangeEvent>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    state
        .permissions
        .require(&user, WorkflowTable::ActionExecutions, TableOp::Create)
        .await?;

    if event.entity.trim().is_empty() {
        return Err(AppError::BadRequest("entity is required".to_string()));
    }

    let event_id = event.event_id;
    tracing::debug!(%event_id, domain = %event.domain, entity = %event.entity, "change event received");
    let outcome = state.dispatcher.dispatch(event).await;

    Ok((StatusCode::ACCEPTED, Json(EventAccepted { event_id, outcome })))
}

async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<DeadLetterQuery>,
) -> ApiResult<Json<Vec<DeadLetter>>> {
    state
        .permissions
        .require(&user, WorkflowTable::ActionExecutions, TableOp::Read)
        .await?;

    let limit = query.limit.unwrap_or(100).clamp(1, MAX_DEAD_LETTER_PAGE);
    Ok(Json(state.store.list_dead_letters(limit).await?))
}
