use axum::{http::StatusCode, response::Json};
use serde_json::json;

pub mod workflow_actions;
pub mod workflow_edges;
pub mod workflow_events;
pub mod workflow_rules;
pub mod workflow_tools;

pub use workflow_actions::{workflow_action_routes, workflow_execution_routes};
pub use workflow_edges::workflow_edge_routes;
pub use workflow_events::workflow_event_routes;
pub use workflow_rules::workflow_rule_routes;
pub use workflow_tools::workflow_tool_routes;

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({"status": "healthy", "service": "ruleflow"})))
}
