use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ruleflow::config::{Config, StoreBackend};
use ruleflow::store::{MemoryWorkflowStore, PgWorkflowStore, WorkflowStore};
use ruleflow::workflows::ActionRegistry;
use ruleflow::{app, database, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let mut memory_store = None;
    let store: Arc<dyn WorkflowStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let db_pool = database::create_pool(&config.database_url).await?;
            database::migrate(&db_pool).await?;
            Arc::new(PgWorkflowStore::new(db_pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; nothing survives a restart");
            let store = Arc::new(MemoryWorkflowStore::new());
            memory_store = Some(store.clone());
            store
        }
    };

    let app_state = Arc::new(AppState::build(config.clone(), store)?);
    if let (Some(store), Some(role_id)) = (memory_store, config.bootstrap_admin_role) {
        seed_admin_role(&store, &app_state.registry, role_id).await;
    }
    let app = app(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Grant one role everything, so a fresh memory-backed instance is usable
async fn seed_admin_role(store: &MemoryWorkflowStore, registry: &ActionRegistry, role_id: uuid::Uuid) {
    store.grant_all(role_id, registry.tags()).await;
    tracing::info!(%role_id, "bootstrap admin role seeded");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
