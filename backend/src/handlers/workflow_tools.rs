//! Tool surface for the chat front end

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::Value;
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::workflows::tools::ToolDescriptor;
use crate::{ApiResult, AppState};

pub fn workflow_tool_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tools))
        .route("/:name", post(invoke_tool))
}

async fn list_tools(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<ToolDescriptor>>> {
    Ok(Json(state.tools.descriptors().to_vec()))
}

async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> ApiResult<Json<Value>> {
    let grants = state.tools.required_grants(&name)?;
    state.permissions.require_all(&user, grants).await?;

    tracing::info!(user_id = %user.user_id, tool = %name, "tool invoked");
    Ok(Json(state.tools.invoke(&name, args, Some(user.user_id)).await?))
}
