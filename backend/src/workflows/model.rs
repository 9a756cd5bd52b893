//! Request and response shapes of the save pipeline

use ruleflow_shared::{TriggerType, WorkflowGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Full-graph save payload. Action keys are caller-local and only tie edges
/// to actions within one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub entity: String,
    #[serde(default)]
    pub is_active: bool,
    /// Version the caller last read; a mismatch fails the save with a conflict
    #[serde(default)]
    pub expected_version: Option<i32>,
    #[serde(default)]
    pub actions: Vec<ActionInput>,
    #[serde(default)]
    pub edges: Vec<EdgeInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionInput {
    pub key: String,
    pub action_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeInput {
    /// Optional label used in validation messages
    #[serde(default)]
    pub key: Option<String>,
    /// `None` marks the start edge
    #[serde(default)]
    pub source_key: Option<String>,
    pub target_key: String,
    #[serde(default)]
    pub source_output_port: Option<String>,
}

impl EdgeInput {
    pub fn start(target_key: &str) -> Self {
        Self {
            key: None,
            source_key: None,
            target_key: target_key.to_string(),
            source_output_port: None,
        }
    }

    pub fn link(source_key: &str, target_key: &str, port: Option<&str>) -> Self {
        Self {
            key: None,
            source_key: Some(source_key.to_string()),
            target_key: target_key.to_string(),
            source_output_port: port.map(str::to_string),
        }
    }

    pub fn is_start(&self) -> bool {
        self.source_key.is_none()
    }

    /// Name used for the edge in validation output
    pub fn label(&self, index: usize) -> String {
        self.key.clone().unwrap_or_else(|| format!("edges[{}]", index))
    }
}

impl SaveWorkflowRequest {
    /// Re-express a persisted graph as a save request keyed by action and edge IDs
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        Self {
            name: graph.rule.name.clone(),
            description: graph.rule.description.clone(),
            trigger_type: graph.rule.trigger_type,
            entity: graph.rule.entity.clone(),
            is_active: graph.rule.is_active,
            expected_version: Some(graph.rule.version),
            actions: graph
                .actions
                .iter()
                .map(|a| ActionInput {
                    key: a.id.to_string(),
                    action_type: a.action_type.clone(),
                    name: a.name.clone(),
                    config: a.config.clone(),
                    position: Some(a.position),
                })
                .collect(),
            edges: graph
                .edges
                .iter()
                .map(|e| EdgeInput {
                    key: Some(e.id.to_string()),
                    source_key: e.source_action_id.map(|id| id.to_string()),
                    target_key: e.target_action_id.to_string(),
                    source_output_port: e.source_output_port.clone(),
                })
                .collect(),
        }
    }
}

/// One validation finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

/// Outcome of a full-graph save or dry run. Validation failures are reported
/// here with a success status rather than as an HTTP error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveWorkflowResponse {
    pub valid: bool,
    pub dry_run: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowGraph>,
}

impl SaveWorkflowResponse {
    /// Response of a save that wrote nothing: a dry run or a failed validation
    pub fn unsaved(result: ValidationResult, dry_run: bool) -> Self {
        Self {
            valid: result.valid,
            dry_run,
            errors: result.errors,
            warnings: result.warnings,
            workflow: None,
        }
    }
}

/// Body of the single-edge create endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEdgeRequest {
    pub target_action_id: Uuid,
    #[serde(default)]
    pub source_action_id: Option<Uuid>,
    #[serde(default)]
    pub source_output_port: Option<String>,
}
