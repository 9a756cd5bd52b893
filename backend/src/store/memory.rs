//! In-process store used for local runs and the test suite.
//!
//! A single `RwLock` guards all state, so every trait call is atomic and a
//! graph commit is never partially visible.

use async_trait::async_trait;
use chrono::Utc;
use ruleflow_shared::{
    Action, ActionEdge, ActionExecution, ActionPermission, AutomationRule, DeadLetter,
    ExecutionStatus, TriggerType, WorkflowGraph, WorkflowNotification,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ExecutionUpdate, GraphPlan, RunClaim, SaveMode, StoreError, StoreResult, WorkflowStore,
};
use crate::auth::rbac::{TableOp, WorkflowTable};

#[derive(Debug, Clone)]
struct RuleRun {
    status: ExecutionStatus,
    attempts: i32,
    last_error: Option<String>,
}

#[derive(Default)]
struct State {
    rules: HashMap<Uuid, AutomationRule>,
    actions: Vec<Action>,
    edges: Vec<ActionEdge>,
    executions: HashMap<Uuid, ActionExecution>,
    action_permissions: HashMap<(Uuid, String), bool>,
    table_permissions: HashMap<(Uuid, WorkflowTable), HashSet<TableOp>>,
    rule_runs: HashMap<(Uuid, Uuid), RuleRun>,
    dead_letters: Vec<DeadLetter>,
    notifications: Vec<WorkflowNotification>,
}

impl State {
    fn graph(&self, rule_id: Uuid) -> Option<WorkflowGraph> {
        let rule = self.rules.get(&rule_id)?.clone();
        let mut actions: Vec<Action> = self
            .actions
            .iter()
            .filter(|a| a.rule_id == rule_id)
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.position);

        let mut edges: Vec<ActionEdge> = self
            .edges
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .cloned()
            .collect();
        edges.sort_by_key(|e| !e.is_start());

        Some(WorkflowGraph { rule, actions, edges })
    }

    fn action_rule(&self, action_id: Uuid) -> Option<Uuid> {
        self.actions
            .iter()
            .find(|a| a.id == action_id)
            .map(|a| a.rule_id)
    }

    /// The same endpoint checks the Postgres foreign keys enforce
    fn check_edge(&self, edge: &ActionEdge) -> StoreResult<()> {
        let endpoints = edge.source_action_id.into_iter().chain([edge.target_action_id]);
        for action_id in endpoints {
            if self.action_rule(action_id) != Some(edge.rule_id) {
                return Err(StoreError::Precondition(format!(
                    "edge {} references action {} outside rule {}",
                    edge.id, action_id, edge.rule_id
                )));
            }
        }
        if edge.source_action_id == Some(edge.target_action_id) {
            return Err(StoreError::Precondition(format!(
                "edge {} connects action {} to itself",
                edge.id, edge.target_action_id
            )));
        }
        if edge.is_start()
            && self
                .edges
                .iter()
                .any(|e| e.rule_id == edge.rule_id && e.is_start())
        {
            return Err(StoreError::Precondition(format!(
                "rule {} already has a start edge",
                edge.rule_id
            )));
        }
        Ok(())
    }
}

pub struct MemoryWorkflowStore {
    state: RwLock<State>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub async fn grant_table(&self, role_id: Uuid, table: WorkflowTable, ops: &[TableOp]) {
        let mut state = self.state.write().await;
        state
            .table_permissions
            .entry((role_id, table))
            .or_default()
            .extend(ops.iter().copied());
    }

    pub async fn grant_action(&self, role_id: Uuid, action_type: &str, allowed: bool) {
        let mut state = self.state.write().await;
        state
            .action_permissions
            .insert((role_id, action_type.to_string()), allowed);
    }

    /// Grant `role_id` every table operation and every listed action type
    pub async fn grant_all<'a>(&self, role_id: Uuid, action_types: impl IntoIterator<Item = &'a str>) {
        for table in WorkflowTable::ALL {
            self.grant_table(role_id, table, &TableOp::ALL).await;
        }
        for action_type in action_types {
            self.grant_action(role_id, action_type, true).await;
        }
    }

    pub async fn notifications(&self) -> Vec<WorkflowNotification> {
        self.state.read().await.notifications.clone()
    }

    /// Status and attempt count of an (event, rule) run
    pub async fn rule_run(&self, event_id: Uuid, rule_id: Uuid) -> Option<(ExecutionStatus, i32)> {
        self.state
            .read()
            .await
            .rule_runs
            .get(&(event_id, rule_id))
            .map(|run| (run.status, run.attempts))
    }

    /// Error recorded by the last failed attempt of an (event, rule) run
    pub async fn last_run_error(&self, event_id: Uuid, rule_id: Uuid) -> Option<String> {
        self.state
            .read()
            .await
            .rule_runs
            .get(&(event_id, rule_id))
            .and_then(|run| run.last_error.clone())
    }

    pub async fn executions(&self) -> Vec<ActionExecution> {
        self.state.read().await.executions.values().cloned().collect()
    }

    pub async fn executions_for_event(&self, event_id: Uuid) -> Vec<ActionExecution> {
        self.state
            .read()
            .await
            .executions
            .values()
            .filter(|e| e.event_id == Some(event_id))
            .cloned()
            .collect()
    }
}

impl Default for MemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn ping(&self) -> bool {
        true
    }

    async fn list_rules(&self) -> StoreResult<Vec<AutomationRule>> {
        let state = self.state.read().await;
        let mut rules: Vec<AutomationRule> = state.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn get_rule(&self, rule_id: Uuid) -> StoreResult<Option<AutomationRule>> {
        Ok(self.state.read().await.rules.get(&rule_id).cloned())
    }

    async fn load_graph(&self, rule_id: Uuid) -> StoreResult<Option<WorkflowGraph>> {
        Ok(self.state.read().await.graph(rule_id))
    }

    async fn commit_graph(&self, plan: GraphPlan) -> StoreResult<WorkflowGraph> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let rule = match plan.mode {
            SaveMode::Create => {
                if state.rules.contains_key(&plan.rule_id) {
                    return Err(StoreError::Precondition(format!(
                        "rule {} already exists",
                        plan.rule_id
                    )));
                }
                AutomationRule {
                    id: plan.rule_id,
                    name: plan.name,
                    description: plan.description,
                    trigger_type: plan.trigger_type,
                    entity: plan.entity,
                    is_active: plan.is_active,
                    version: 1,
                    created_by: plan.actor,
                    created_at: now,
                    updated_at: None,
                }
            }
            SaveMode::Replace { expected_version } => {
                let existing = state
                    .rules
                    .get(&plan.rule_id)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("Rule {}", plan.rule_id)))?;
                if let Some(expected) = expected_version {
                    if expected != existing.version {
                        return Err(StoreError::VersionConflict {
                            rule_id: plan.rule_id,
                            expected,
                            found: existing.version,
                        });
                    }
                }
                AutomationRule {
                    name: plan.name,
                    description: plan.description,
                    trigger_type: plan.trigger_type,
                    entity: plan.entity,
                    is_active: plan.is_active,
                    version: existing.version + 1,
                    updated_at: Some(now),
                    ..existing
                }
            }
        };

        // Validate against a scratch copy so a rejected plan leaves no trace
        let rule_id = rule.id;
        let mut actions: Vec<Action> = state
            .actions
            .iter()
            .filter(|a| a.rule_id != rule_id)
            .cloned()
            .collect();
        actions.extend(plan.actions);
        let mut scratch = State {
            actions,
            edges: state
                .edges
                .iter()
                .filter(|e| e.rule_id != rule_id)
                .cloned()
                .collect(),
            ..State::default()
        };
        for edge in plan.edges {
            if edge.rule_id != rule_id {
                return Err(StoreError::Precondition(format!(
                    "edge {} belongs to rule {}, not {}",
                    edge.id, edge.rule_id, rule_id
                )));
            }
            scratch.check_edge(&edge)?;
            scratch.edges.push(edge);
        }

        state.actions = scratch.actions;
        state.edges = scratch.edges;
        state.rules.insert(rule_id, rule);

        state
            .graph(rule_id)
            .ok_or_else(|| StoreError::NotFound(format!("Rule {}", rule_id)))
    }

    async fn delete_rule(&self, rule_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.rules.remove(&rule_id).is_none() {
            return Ok(false);
        }
        state.actions.retain(|a| a.rule_id != rule_id);
        state.edges.retain(|e| e.rule_id != rule_id);
        Ok(true)
    }

    async fn active_rules_for(
        &self,
        entity: &str,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<AutomationRule>> {
        let state = self.state.read().await;
        let mut rules: Vec<AutomationRule> = state
            .rules
            .values()
            .filter(|r| r.is_active && r.trigger_type == trigger_type && r.entity == entity)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn get_action(&self, action_id: Uuid) -> StoreResult<Option<Action>> {
        let state = self.state.read().await;
        Ok(state.actions.iter().find(|a| a.id == action_id).cloned())
    }

    async fn list_edges(&self, rule_id: Uuid) -> StoreResult<Vec<ActionEdge>> {
        let state = self.state.read().await;
        Ok(state.graph(rule_id).map(|g| g.edges).unwrap_or_default())
    }

    async fn insert_edge(&self, edge: ActionEdge) -> StoreResult<ActionEdge> {
        let mut state = self.state.write().await;
        if !state.rules.contains_key(&edge.rule_id) {
            return Err(StoreError::NotFound(format!("Rule {}", edge.rule_id)));
        }
        state.check_edge(&edge)?;
        state.edges.push(edge.clone());
        Ok(edge)
    }

    async fn delete_edge(&self, rule_id: Uuid, edge_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.edges.len();
        state
            .edges
            .retain(|e| !(e.rule_id == rule_id && e.id == edge_id));
        Ok(state.edges.len() != before)
    }

    async fn delete_all_edges(&self, rule_id: Uuid) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.edges.len();
        state.edges.retain(|e| e.rule_id != rule_id);
        Ok((before - state.edges.len()) as u64)
    }

    async fn insert_execution(&self, execution: ActionExecution) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn update_execution(&self, execution_id: Uuid, update: ExecutionUpdate) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let execution = state
            .executions
            .get_mut(&execution_id)
            .ok_or_else(|| StoreError::NotFound(format!("Execution {}", execution_id)))?;
        if let Some(status) = update.status {
            execution.status = status;
        }
        if update.started_at.is_some() {
            execution.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            execution.completed_at = update.completed_at;
        }
        if update.result.is_some() {
            execution.result = update.result;
        }
        if update.error.is_some() {
            execution.error = update.error;
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<ActionExecution>> {
        Ok(self.state.read().await.executions.get(&execution_id).cloned())
    }

    async fn succeeded_steps(&self, event_id: Uuid, rule_id: Uuid) -> StoreResult<Vec<ActionExecution>> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .values()
            .filter(|e| {
                e.event_id == Some(event_id)
                    && e.rule_id == Some(rule_id)
                    && e.action_id.is_some()
                    && e.status == ExecutionStatus::Succeeded
            })
            .cloned()
            .collect())
    }

    async fn action_permissions(&self, role_ids: &[Uuid]) -> StoreResult<Vec<ActionPermission>> {
        let state = self.state.read().await;
        Ok(state
            .action_permissions
            .iter()
            .filter(|((role_id, _), _)| role_ids.contains(role_id))
            .map(|((role_id, action_type), allowed)| ActionPermission {
                role_id: *role_id,
                action_type: action_type.clone(),
                allowed: *allowed,
            })
            .collect())
    }

    async fn table_allowed(
        &self,
        role_ids: &[Uuid],
        table: WorkflowTable,
        op: TableOp,
    ) -> StoreResult<bool> {
        let state = self.state.read().await;
        Ok(role_ids.iter().any(|role_id| {
            state
                .table_permissions
                .get(&(*role_id, table))
                .is_some_and(|ops| ops.contains(&op))
        }))
    }

    async fn claim_rule_run(&self, event_id: Uuid, rule_id: Uuid) -> StoreResult<RunClaim> {
        let mut state = self.state.write().await;
        let run = state.rule_runs.entry((event_id, rule_id)).or_insert(RuleRun {
            status: ExecutionStatus::Pending,
            attempts: 0,
            last_error: None,
        });
        if run.status == ExecutionStatus::Succeeded {
            return Ok(RunClaim::AlreadySucceeded);
        }
        run.status = ExecutionStatus::Running;
        run.attempts += 1;
        Ok(RunClaim::Claimed { attempt: run.attempts })
    }

    async fn finish_rule_run(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let run = state
            .rule_runs
            .get_mut(&(event_id, rule_id))
            .ok_or_else(|| StoreError::NotFound(format!("Run of rule {} for event {}", rule_id, event_id)))?;
        run.status = status;
        run.last_error = error;
        Ok(())
    }

    async fn insert_dead_letter(&self, letter: DeadLetter) -> StoreResult<()> {
        self.state.write().await.dead_letters.push(letter);
        Ok(())
    }

    async fn list_dead_letters(&self, limit: i64) -> StoreResult<Vec<DeadLetter>> {
        let state = self.state.read().await;
        Ok(state
            .dead_letters
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_notification(&self, notification: WorkflowNotification) -> StoreResult<()> {
        self.state.write().await.notifications.push(notification);
        Ok(())
    }
}
