use async_trait::async_trait;
use ruleflow_shared::{
    Action, ActionEdge, ActionExecution, ActionPermission, AutomationRule, DeadLetter,
    ExecutionStatus, TriggerType, WorkflowGraph, WorkflowNotification,
};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{
    DbContext, ExecutionUpdate, GraphPlan, RunClaim, SaveMode, StoreError, StoreResult,
    WorkflowStore,
};
use crate::auth::rbac::{TableOp, WorkflowTable};

const RULE_COLUMNS: &str = "id, name, description, trigger_type, entity, is_active, version, \
                            created_by, created_at, updated_at";
const ACTION_COLUMNS: &str = "id, rule_id, action_type, name, config, position, created_at";
const EDGE_COLUMNS: &str =
    "id, rule_id, source_action_id, target_action_id, source_output_port, created_at";
const EXECUTION_COLUMNS: &str = "id, action_type, status, requested_by, rule_id, action_id, \
                                 event_id, started_at, completed_at, result, error, created_at";

/// Postgres-backed store. Every multi-statement write runs in one
/// READ COMMITTED transaction.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map constraint violations raised by the graph tables onto precondition failures
fn constraint_error(err: sqlx::Error, context: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(constraint) = db_err.constraint() {
            let message = match constraint {
                "uq_action_edges_start" => "rule already has a start edge".to_string(),
                c if c.starts_with("action_edges_source_action_id")
                    || c.starts_with("action_edges_target_action_id") =>
                {
                    "edge references an action outside its rule".to_string()
                }
                c if c.starts_with("action_edges_check") => {
                    "edge violates a structural check (self-loop or start edge with port)".to_string()
                }
                other => format!("constraint {} violated", other),
            };
            return StoreError::Precondition(message);
        }
    }
    StoreError::Database { context, source: err }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn ping(&self) -> bool {
        crate::database::health_check(&self.pool).await
    }

    async fn list_rules(&self) -> StoreResult<Vec<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(&format!(
            "SELECT {} FROM automation_rules ORDER BY name, id",
            RULE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("list rules")
    }

    async fn get_rule(&self, rule_id: Uuid) -> StoreResult<Option<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(&format!(
            "SELECT {} FROM automation_rules WHERE id = $1",
            RULE_COLUMNS
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .context("get rule")
    }

    async fn load_graph(&self, rule_id: Uuid) -> StoreResult<Option<WorkflowGraph>> {
        let Some(rule) = self.get_rule(rule_id).await? else {
            return Ok(None);
        };

        let actions = sqlx::query_as::<_, Action>(&format!(
            "SELECT {} FROM actions WHERE rule_id = $1 ORDER BY position, created_at, id",
            ACTION_COLUMNS
        ))
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
        .context("load actions")?;

        let edges = self.list_edges(rule_id).await?;

        Ok(Some(WorkflowGraph { rule, actions, edges }))
    }

    async fn commit_graph(&self, plan: GraphPlan) -> StoreResult<WorkflowGraph> {
        let mut tx = self.pool.begin().await.context("begin graph transaction")?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .context("set isolation level")?;

        let rule = match plan.mode {
            SaveMode::Create => sqlx::query_as::<_, AutomationRule>(&format!(
                "INSERT INTO automation_rules
                 (id, name, description, trigger_type, entity, is_active, version, created_by, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, 1, $7, NOW())
                 RETURNING {}",
                RULE_COLUMNS
            ))
            .bind(plan.rule_id)
            .bind(&plan.name)
            .bind(&plan.description)
            .bind(plan.trigger_type)
            .bind(&plan.entity)
            .bind(plan.is_active)
            .bind(plan.actor)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| constraint_error(e, "insert rule"))?,
            SaveMode::Replace { expected_version } => {
                let current: Option<i32> =
                    sqlx::query_scalar("SELECT version FROM automation_rules WHERE id = $1 FOR UPDATE")
                        .bind(plan.rule_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .context("lock rule")?;
                let current = current
                    .ok_or_else(|| StoreError::NotFound(format!("Rule {}", plan.rule_id)))?;
                if let Some(expected) = expected_version {
                    if expected != current {
                        return Err(StoreError::VersionConflict {
                            rule_id: plan.rule_id,
                            expected,
                            found: current,
                        });
                    }
                }

                let rule = sqlx::query_as::<_, AutomationRule>(&format!(
                    "UPDATE automation_rules
                     SET name = $2, description = $3, trigger_type = $4, entity = $5,
                         is_active = $6, version = version + 1, updated_at = NOW()
                     WHERE id = $1
                     RETURNING {}",
                    RULE_COLUMNS
                ))
                .bind(plan.rule_id)
                .bind(&plan.name)
                .bind(&plan.description)
                .bind(plan.trigger_type)
                .bind(&plan.entity)
                .bind(plan.is_active)
                .fetch_one(&mut *tx)
                .await
                .context("update rule")?;

                sqlx::query("DELETE FROM action_edges WHERE rule_id = $1")
                    .bind(plan.rule_id)
                    .execute(&mut *tx)
                    .await
                    .context("delete stale edges")?;
                sqlx::query("DELETE FROM actions WHERE rule_id = $1")
                    .bind(plan.rule_id)
                    .execute(&mut *tx)
                    .await
                    .context("delete stale actions")?;

                rule
            }
        };

        let mut actions = Vec::with_capacity(plan.actions.len());
        for action in &plan.actions {
            let inserted = sqlx::query_as::<_, Action>(&format!(
                "INSERT INTO actions (id, rule_id, action_type, name, config, position, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING {}",
                ACTION_COLUMNS
            ))
            .bind(action.id)
            .bind(rule.id)
            .bind(&action.action_type)
            .bind(&action.name)
            .bind(&action.config)
            .bind(action.position)
            .bind(action.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| constraint_error(e, "insert action"))?;
            actions.push(inserted);
        }

        let mut edges = Vec::with_capacity(plan.edges.len());
        for edge in &plan.edges {
            let inserted = sqlx::query_as::<_, ActionEdge>(&format!(
                "INSERT INTO action_edges
                 (id, rule_id, source_action_id, target_action_id, source_output_port, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING {}",
                EDGE_COLUMNS
            ))
            .bind(edge.id)
            .bind(rule.id)
            .bind(edge.source_action_id)
            .bind(edge.target_action_id)
            .bind(&edge.source_output_port)
            .bind(edge.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| constraint_error(e, "insert edge"))?;
            edges.push(inserted);
        }

        tx.commit().await.context("commit graph transaction")?;
        debug!(rule_id = %rule.id, actions = actions.len(), edges = edges.len(), "graph committed");

        Ok(WorkflowGraph { rule, actions, edges })
    }

    async fn delete_rule(&self, rule_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .context("delete rule")?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_rules_for(
        &self,
        entity: &str,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<AutomationRule>> {
        sqlx::query_as::<_, AutomationRule>(&format!(
            "SELECT {} FROM automation_rules
             WHERE is_active AND entity = $1 AND trigger_type = $2
             ORDER BY created_at",
            RULE_COLUMNS
        ))
        .bind(entity)
        .bind(trigger_type)
        .fetch_all(&self.pool)
        .await
        .context("match active rules")
    }

    async fn get_action(&self, action_id: Uuid) -> StoreResult<Option<Action>> {
        sqlx::query_as::<_, Action>(&format!("SELECT {} FROM actions WHERE id = $1", ACTION_COLUMNS))
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await
            .context("get action")
    }

    async fn list_edges(&self, rule_id: Uuid) -> StoreResult<Vec<ActionEdge>> {
        sqlx::query_as::<_, ActionEdge>(&format!(
            "SELECT {} FROM action_edges WHERE rule_id = $1
             ORDER BY (source_action_id IS NOT NULL), created_at, id",
            EDGE_COLUMNS
        ))
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
        .context("list edges")
    }

    async fn insert_edge(&self, edge: ActionEdge) -> StoreResult<ActionEdge> {
        sqlx::query_as::<_, ActionEdge>(&format!(
            "INSERT INTO action_edges
             (id, rule_id, source_action_id, target_action_id, source_output_port, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            EDGE_COLUMNS
        ))
        .bind(edge.id)
        .bind(edge.rule_id)
        .bind(edge.source_action_id)
        .bind(edge.target_action_id)
        .bind(&edge.source_output_port)
        .bind(edge.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "insert edge"))
    }

    async fn delete_edge(&self, rule_id: Uuid, edge_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM action_edges WHERE id = $1 AND rule_id = $2")
            .bind(edge_id)
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .context("delete edge")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_edges(&self, rule_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM action_edges WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .context("delete all edges")?;
        Ok(result.rows_affected())
    }

    async fn insert_execution(&self, execution: ActionExecution) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO action_executions
             (id, action_type, status, requested_by, rule_id, action_id, event_id,
              started_at, completed_at, result, error, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(execution.id)
        .bind(&execution.action_type)
        .bind(execution.status)
        .bind(execution.requested_by)
        .bind(execution.rule_id)
        .bind(execution.action_id)
        .bind(execution.event_id)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await
        .context("insert execution")?;
        Ok(())
    }

    async fn update_execution(&self, execution_id: Uuid, update: ExecutionUpdate) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE action_executions
             SET status = COALESCE($2, status),
                 started_at = COALESCE($3, started_at),
                 completed_at = COALESCE($4, completed_at),
                 result = COALESCE($5, result),
                 error = COALESCE($6, error)
             WHERE id = $1",
        )
        .bind(execution_id)
        .bind(update.status)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.result)
        .bind(update.error)
        .execute(&self.pool)
        .await
        .context("update execution")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Execution {}", execution_id)));
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<ActionExecution>> {
        sqlx::query_as::<_, ActionExecution>(&format!(
            "SELECT {} FROM action_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .context("get execution")
    }

    async fn succeeded_steps(&self, event_id: Uuid, rule_id: Uuid) -> StoreResult<Vec<ActionExecution>> {
        sqlx::query_as::<_, ActionExecution>(&format!(
            "SELECT {} FROM action_executions
             WHERE event_id = $1 AND rule_id = $2 AND action_id IS NOT NULL AND status = $3",
            EXECUTION_COLUMNS
        ))
        .bind(event_id)
        .bind(rule_id)
        .bind(ExecutionStatus::Succeeded)
        .fetch_all(&self.pool)
        .await
        .context("load succeeded steps")
    }

    async fn action_permissions(&self, role_ids: &[Uuid]) -> StoreResult<Vec<ActionPermission>> {
        sqlx::query_as::<_, ActionPermission>(
            "SELECT role_id, action_type, allowed FROM action_permissions WHERE role_id = ANY($1)",
        )
        .bind(role_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("load action permissions")
    }

    async fn table_allowed(
        &self,
        role_ids: &[Uuid],
        table: WorkflowTable,
        op: TableOp,
    ) -> StoreResult<bool> {
        // Column name comes from a closed enum, never from input
        let query = format!(
            "SELECT EXISTS (
                SELECT 1 FROM table_permissions
                WHERE role_id = ANY($1) AND table_name = $2 AND {}
             )",
            op.column()
        );
        sqlx::query_scalar::<_, bool>(&query)
            .bind(role_ids.to_vec())
            .bind(table.as_str())
            .fetch_one(&self.pool)
            .await
            .context("check table permission")
    }

    async fn claim_rule_run(&self, event_id: Uuid, rule_id: Uuid) -> StoreResult<RunClaim> {
        // Upsert that leaves succeeded runs untouched; RETURNING yields no row for them
        let attempt: Option<i32> = sqlx::query_scalar(
            "INSERT INTO workflow_rule_runs (event_id, rule_id, status, attempts, updated_at)
             VALUES ($1, $2, 'running', 1, NOW())
             ON CONFLICT (event_id, rule_id) DO UPDATE
             SET status = 'running',
                 attempts = workflow_rule_runs.attempts + 1,
                 updated_at = NOW()
             WHERE workflow_rule_runs.status <> 'succeeded'
             RETURNING attempts",
        )
        .bind(event_id)
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .context("claim rule run")?;

        Ok(match attempt {
            Some(attempt) => RunClaim::Claimed { attempt },
            None => RunClaim::AlreadySucceeded,
        })
    }

    async fn finish_rule_run(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_rule_runs
             SET status = $3, last_error = $4, updated_at = NOW()
             WHERE event_id = $1 AND rule_id = $2",
        )
        .bind(event_id)
        .bind(rule_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("finish rule run")?;
        Ok(())
    }

    async fn insert_dead_letter(&self, letter: DeadLetter) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO workflow_dead_letters
             (id, event_id, rule_id, reason, error, attempts, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(letter.id)
        .bind(letter.event_id)
        .bind(letter.rule_id)
        .bind(&letter.reason)
        .bind(&letter.error)
        .bind(letter.attempts)
        .bind(&letter.payload)
        .bind(letter.created_at)
        .execute(&self.pool)
        .await
        .context("insert dead letter")?;
        Ok(())
    }

    async fn list_dead_letters(&self, limit: i64) -> StoreResult<Vec<DeadLetter>> {
        sqlx::query_as::<_, DeadLetter>(
            "SELECT id, event_id, rule_id, reason, error, attempts, payload, created_at
             FROM workflow_dead_letters
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list dead letters")
    }

    async fn insert_notification(&self, notification: WorkflowNotification) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO workflow_notifications (id, user_id, rule_id, title, message, level, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.rule_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.level)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .context("insert notification")?;
        Ok(())
    }
}
