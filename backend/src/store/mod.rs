//! Persistence for rules, their action graphs, executions and permissions.
//!
//! Only the save orchestrator and the single-edge operations mutate the graph
//! tables; everything else reads.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ruleflow_shared::{
    Action, ActionEdge, ActionExecution, ActionPermission, AutomationRule, DeadLetter,
    ExecutionStatus, TriggerType, WorkflowGraph, WorkflowNotification,
};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::rbac::{TableOp, WorkflowTable};

pub use memory::MemoryWorkflowStore;
pub use postgres::PgWorkflowStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("rule {rule_id} was modified concurrently: expected version {expected}, found {found}")]
    VersionConflict {
        rule_id: Uuid,
        expected: i32,
        found: i32,
    },
    #[error("{0}")]
    Precondition(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Attach call-site context to sqlx failures
pub(crate) trait DbContext<T> {
    fn context(self, context: &'static str) -> StoreResult<T>;
}

impl<T> DbContext<T> for Result<T, sqlx::Error> {
    fn context(self, context: &'static str) -> StoreResult<T> {
        self.map_err(|source| StoreError::Database { context, source })
    }
}

/// How a full-graph commit treats the rule row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Create,
    /// Replace the graph of an existing rule. `expected_version` enables the
    /// optimistic concurrency check.
    Replace { expected_version: Option<i32> },
}

/// Fully resolved graph ready to be written in one transaction.
/// Action and edge IDs are already generated; edges reference them.
#[derive(Debug, Clone)]
pub struct GraphPlan {
    pub mode: SaveMode,
    pub rule_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub entity: String,
    pub is_active: bool,
    pub actor: Option<Uuid>,
    pub actions: Vec<Action>,
    pub edges: Vec<ActionEdge>,
}

/// Outcome of claiming an (event, rule) run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunClaim {
    /// Proceed; `attempt` is 1-based
    Claimed { attempt: i32 },
    /// A previous delivery already completed this run
    AlreadySucceeded,
}

/// Partial update applied to an execution record
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutionUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn succeeded(result: serde_json::Value) -> Self {
        Self {
            status: Some(ExecutionStatus::Succeeded),
            completed_at: Some(Utc::now()),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(ExecutionStatus::Failed),
            completed_at: Some(Utc::now()),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn ping(&self) -> bool;

    // Rules and graphs
    async fn list_rules(&self) -> StoreResult<Vec<AutomationRule>>;
    async fn get_rule(&self, rule_id: Uuid) -> StoreResult<Option<AutomationRule>>;
    async fn load_graph(&self, rule_id: Uuid) -> StoreResult<Option<WorkflowGraph>>;
    /// Upsert the rule and replace its whole graph atomically
    async fn commit_graph(&self, plan: GraphPlan) -> StoreResult<WorkflowGraph>;
    async fn delete_rule(&self, rule_id: Uuid) -> StoreResult<bool>;
    async fn active_rules_for(
        &self,
        entity: &str,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<AutomationRule>>;

    // Incremental edge operations
    async fn get_action(&self, action_id: Uuid) -> StoreResult<Option<Action>>;
    async fn list_edges(&self, rule_id: Uuid) -> StoreResult<Vec<ActionEdge>>;
    async fn insert_edge(&self, edge: ActionEdge) -> StoreResult<ActionEdge>;
    async fn delete_edge(&self, rule_id: Uuid, edge_id: Uuid) -> StoreResult<bool>;
    async fn delete_all_edges(&self, rule_id: Uuid) -> StoreResult<u64>;

    // Executions
    async fn insert_execution(&self, execution: ActionExecution) -> StoreResult<()>;
    async fn update_execution(&self, execution_id: Uuid, update: ExecutionUpdate) -> StoreResult<()>;
    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<ActionExecution>>;
    /// Graph steps of one (event, rule) run that finished successfully
    async fn succeeded_steps(&self, event_id: Uuid, rule_id: Uuid) -> StoreResult<Vec<ActionExecution>>;

    // Permissions
    async fn action_permissions(&self, role_ids: &[Uuid]) -> StoreResult<Vec<ActionPermission>>;
    async fn table_allowed(
        &self,
        role_ids: &[Uuid],
        table: WorkflowTable,
        op: TableOp,
    ) -> StoreResult<bool>;

    // Dispatch bookkeeping
    async fn claim_rule_run(&self, event_id: Uuid, rule_id: Uuid) -> StoreResult<RunClaim>;
    async fn finish_rule_run(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> StoreResult<()>;
    async fn insert_dead_letter(&self, letter: DeadLetter) -> StoreResult<()>;
    async fn list_dead_letters(&self, limit: i64) -> StoreResult<Vec<DeadLetter>>;

    // Side effects of built-in action types
    async fn insert_notification(&self, notification: WorkflowNotification) -> StoreResult<()>;

    /// Whether any of `role_ids` may run `action_type`. An explicit deny on one
    /// role does not cancel an allow on another.
    async fn is_action_allowed(&self, role_ids: &[Uuid], action_type: &str) -> StoreResult<bool> {
        let permissions = self.action_permissions(role_ids).await?;
        Ok(permissions
            .iter()
            .any(|p| p.allowed && p.action_type == action_type))
    }
}
