//! Role-Based Access Control for the workflow tables
//!
//! Mutations of rules, actions and edges, and reads of executions, are gated
//! per table: a caller passes when any of their roles grants the operation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::CallerIdentity;
use crate::error::{ApiResult, AppError};
use crate::store::WorkflowStore;

/// Tables owned by the workflow engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTable {
    AutomationRules,
    Actions,
    ActionEdges,
    ActionExecutions,
}

impl WorkflowTable {
    pub const ALL: [WorkflowTable; 4] = [
        Self::AutomationRules,
        Self::Actions,
        Self::ActionEdges,
        Self::ActionExecutions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutomationRules => "automation_rules",
            Self::Actions => "actions",
            Self::ActionEdges => "action_edges",
            Self::ActionExecutions => "action_executions",
        }
    }
}

/// Operations that can be performed on a table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TableOp {
    Read,
    Create,
    Update,
    Delete,
}

impl TableOp {
    pub const ALL: [TableOp; 4] = [Self::Read, Self::Create, Self::Update, Self::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Column of `table_permissions` holding this grant
    pub fn column(&self) -> &'static str {
        match self {
            Self::Read => "can_read",
            Self::Create => "can_create",
            Self::Update => "can_update",
            Self::Delete => "can_delete",
        }
    }
}

/// Grants needed to list rules or check a graph without saving it
pub const RULES_READ: &[(WorkflowTable, TableOp)] = &[(WorkflowTable::AutomationRules, TableOp::Read)];

/// Grants needed to read a whole graph
pub const GRAPH_READ: &[(WorkflowTable, TableOp)] = &[
    (WorkflowTable::AutomationRules, TableOp::Read),
    (WorkflowTable::Actions, TableOp::Read),
    (WorkflowTable::ActionEdges, TableOp::Read),
];

/// Grants needed to create a rule together with its graph
pub const GRAPH_CREATE: &[(WorkflowTable, TableOp)] = &[
    (WorkflowTable::AutomationRules, TableOp::Create),
    (WorkflowTable::Actions, TableOp::Create),
    (WorkflowTable::ActionEdges, TableOp::Create),
];

/// Grants needed to replace an existing rule's graph
pub const GRAPH_REPLACE: &[(WorkflowTable, TableOp)] = &[
    (WorkflowTable::AutomationRules, TableOp::Update),
    (WorkflowTable::Actions, TableOp::Create),
    (WorkflowTable::Actions, TableOp::Delete),
    (WorkflowTable::ActionEdges, TableOp::Create),
    (WorkflowTable::ActionEdges, TableOp::Delete),
];

/// Permission checker backed by the store's grant tables
#[derive(Clone)]
pub struct PermissionChecker {
    store: Arc<dyn WorkflowStore>,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Check if any of the caller's roles grants `op` on `table`
    pub async fn has_permission(
        &self,
        caller: &CallerIdentity,
        table: WorkflowTable,
        op: TableOp,
    ) -> ApiResult<bool> {
        if caller.role_ids.is_empty() {
            return Ok(false);
        }
        Ok(self.store.table_allowed(&caller.role_ids, table, op).await?)
    }

    /// Require a permission or return error
    pub async fn require(
        &self,
        caller: &CallerIdentity,
        table: WorkflowTable,
        op: TableOp,
    ) -> ApiResult<()> {
        if self.has_permission(caller, table, op).await? {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %caller.user_id,
                table = table.as_str(),
                op = op.as_str(),
                "permission denied"
            );
            Err(AppError::InsufficientPermissions {
                required: format!("{}:{}", table.as_str(), op.as_str()),
            })
        }
    }

    /// Require every listed permission, reporting the first one missing
    pub async fn require_all(
        &self,
        caller: &CallerIdentity,
        grants: &[(WorkflowTable, TableOp)],
    ) -> ApiResult<()> {
        for (table, op) in grants {
            self.require(caller, *table, *op).await?;
        }
        Ok(())
    }
}
