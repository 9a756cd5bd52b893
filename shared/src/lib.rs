use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which entity change fires a rule
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "trigger_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    OnCreate,
    OnUpdate,
    OnDelete,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnCreate => "on_create",
            Self::OnUpdate => "on_update",
            Self::OnDelete => "on_delete",
            Self::Manual => "manual",
        }
    }

    /// Trigger type that a domain change maps onto
    pub fn for_change(action: ChangeAction) -> Self {
        match action {
            ChangeAction::Created => Self::OnCreate,
            ChangeAction::Updated => Self::OnUpdate,
            ChangeAction::Deleted => Self::OnDelete,
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "execution_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    /// Schema-qualified table the rule watches, e.g. `sales.orders`
    pub entity: String,
    pub is_active: bool,
    /// Bumped by every full-graph save
    pub version: i32,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A node in a rule's action graph
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub action_type: String,
    pub name: Option<String>,
    pub config: serde_json::Value,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

/// Directed connection between two actions. A `None` source marks the start edge.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEdge {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub source_action_id: Option<Uuid>,
    pub target_action_id: Uuid,
    pub source_output_port: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ActionEdge {
    pub fn is_start(&self) -> bool {
        self.source_action_id.is_none()
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionExecution {
    pub id: Uuid,
    pub action_type: String,
    pub status: ExecutionStatus,
    pub requested_by: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub action_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionPermission {
    pub role_id: Uuid,
    pub action_type: String,
    pub allowed: bool,
}

/// A rule together with its full action graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowGraph {
    pub rule: AutomationRule,
    pub actions: Vec<Action>,
    pub edges: Vec<ActionEdge>,
}

impl WorkflowGraph {
    pub fn start_edge(&self) -> Option<&ActionEdge> {
        self.edges.iter().find(|e| e.is_start())
    }

    pub fn action(&self, id: Uuid) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn outgoing(&self, action_id: Uuid) -> impl Iterator<Item = &ActionEdge> {
        self.edges
            .iter()
            .filter(move |e| e.source_action_id == Some(action_id))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

/// Change notification emitted by a business domain after its write commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub domain: String,
    pub entity: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        domain: impl Into<String>,
        entity: impl Into<String>,
        action: ChangeAction,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            domain: domain.into(),
            entity: entity.into(),
            action,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowNotification {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub level: String,
    pub created_at: DateTime<Utc>,
}

/// A triggered rule run that exhausted its retries, or an event that could not be queued
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub id: Uuid,
    pub event_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub reason: String,
    pub error: Option<String>,
    pub attempts: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
