//! Workflow automation rule engine
//!
//! Rules watch an entity for creates, updates or deletes and run a DAG of
//! typed actions when a matching change event arrives. Graphs are edited as
//! a whole through the save orchestrator or edge by edge, and single actions
//! can be executed by hand.

use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod store;
pub mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use auth::PermissionChecker;
use config::Config;
use store::WorkflowStore;
use workflows::{
    ActionRegistry, EventDispatcher, ExecutionService, GraphRunner, SaveOrchestrator, ToolCatalog,
};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn WorkflowStore>,
    pub registry: Arc<ActionRegistry>,
    pub orchestrator: SaveOrchestrator,
    pub executions: ExecutionService,
    pub dispatcher: Arc<EventDispatcher>,
    pub tools: ToolCatalog,
    pub permissions: PermissionChecker,
}

impl AppState {
    /// Wire every service over one store. Starts the dispatcher's worker
    /// pool, so it must run inside a tokio runtime.
    pub fn build(config: Config, store: Arc<dyn WorkflowStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ruleflow/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(config.execution.http_timeout())
            .build()?;
        let registry = Arc::new(ActionRegistry::builtin(store.clone(), http)?);

        let orchestrator = SaveOrchestrator::new(store.clone(), registry.clone());
        let executions = ExecutionService::new(store.clone(), registry.clone(), &config.execution);
        let runner = Arc::new(GraphRunner::new(
            registry.clone(),
            executions.clone(),
            config.execution.max_steps,
        ));
        let dispatcher = Arc::new(EventDispatcher::start(
            store.clone(),
            runner,
            config.dispatch.clone(),
        ));
        let tools = ToolCatalog::new(orchestrator.clone(), registry.clone());
        let permissions = PermissionChecker::new(store.clone());

        tracing::info!(
            action_types = registry.tags().collect::<Vec<_>>().join(","),
            workers = dispatcher.worker_count(),
            "workflow engine ready"
        );

        Ok(Self {
            config,
            store,
            registry,
            orchestrator,
            executions,
            dispatcher,
            tools,
            permissions,
        })
    }
}

/// The HTTP surface
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Ruleflow Workflow Engine API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(middleware::detailed_health_check))
        .nest(
            "/workflow/rules",
            handlers::workflow_rule_routes().merge(handlers::workflow_edge_routes()),
        )
        .nest("/workflow/actions", handlers::workflow_action_routes())
        .nest("/workflow/executions", handlers::workflow_execution_routes())
        .nest("/workflow/tools", handlers::workflow_tool_routes())
        .nest("/workflow", handlers::workflow_event_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::middleware::from_fn(middleware::observability_layer)),
        )
        .with_state(state)
}
