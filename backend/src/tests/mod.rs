pub mod unit;
pub mod integration;
pub mod helpers;

// Common test utilities and shared test setup
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::store::{MemoryWorkflowStore, PgWorkflowStore};
use crate::{app, AppState};

/// Engine wired over the memory store, with one all-powerful role
pub struct TestContext {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryWorkflowStore>,
    pub admin_role: Uuid,
    pub admin_id: Uuid,
}

impl TestContext {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryWorkflowStore::new());
        let state = AppState::build(Config::for_memory(helpers::TEST_SECRET), store.clone())
            .expect("Failed to build app state");

        let admin_role = Uuid::new_v4();
        store.grant_all(admin_role, state.registry.tags()).await;

        Self {
            state: Arc::new(state),
            store,
            admin_role,
            admin_id: Uuid::new_v4(),
        }
    }

    pub fn router(&self) -> Router {
        app(self.state.clone())
    }

    pub fn admin_token(&self) -> String {
        helpers::create_test_jwt(self.admin_id, vec![self.admin_role])
    }

    /// Token for a fresh user holding `roles`
    pub fn token_for(&self, roles: Vec<Uuid>) -> String {
        helpers::create_test_jwt(Uuid::new_v4(), roles)
    }
}

/// Postgres-backed store for the `#[ignore]`d database tests
pub struct PgTestContext {
    pub db_pool: PgPool,
    pub store: Arc<PgWorkflowStore>,
}

impl PgTestContext {
    /// Connects to `TEST_DATABASE_URL` and applies migrations
    pub async fn new() -> Self {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must be set for database tests");
        let db_pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .expect("Failed to run migrations");

        Self {
            store: Arc::new(PgWorkflowStore::new(db_pool.clone())),
            db_pool,
        }
    }

    pub async fn cleanup(&self) {
        // Clean up test data between tests
        let tables = [
            "workflow_dead_letters",
            "workflow_rule_runs",
            "workflow_notifications",
            "action_executions",
            "action_edges",
            "actions",
            "automation_rules",
            "action_permissions",
            "table_permissions",
        ];

        for table in tables {
            sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
                .execute(&self.db_pool)
                .await
                .ok(); // Ignore errors for tables that might not exist
        }
    }
}
