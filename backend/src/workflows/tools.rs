//! Engine operations exposed as callable tools for the chat front end.
//! Preview and validate never write; create and update go through the same
//! save pipeline as the HTTP endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::model::SaveWorkflowRequest;
use super::orchestrator::SaveOrchestrator;
use super::registry::ActionRegistry;
use super::{WorkflowError, WorkflowResult};
use crate::auth::rbac::{TableOp, WorkflowTable, GRAPH_CREATE, GRAPH_READ, GRAPH_REPLACE, RULES_READ};

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Deserialize)]
struct WorkflowArgs {
    workflow: SaveWorkflowRequest,
    #[serde(default)]
    rule_id: Option<Uuid>,
}

pub struct ToolCatalog {
    orchestrator: SaveOrchestrator,
    registry: Arc<ActionRegistry>,
    tools: Vec<ToolDescriptor>,
}

fn workflow_schema(with_rule_id: bool) -> Value {
    let mut properties = json!({
        "workflow": {
            "type": "object",
            "description": "Full graph: name, trigger_type, entity, is_active, actions[{key, action_type, config}], edges[{source_key?, target_key, source_output_port?}]"
        }
    });
    let mut required = vec!["workflow"];
    if with_rule_id {
        properties["rule_id"] = json!({"type": "string", "format": "uuid"});
        required.push("rule_id");
    }
    json!({"type": "object", "properties": properties, "required": required})
}

impl ToolCatalog {
    pub fn new(orchestrator: SaveOrchestrator, registry: Arc<ActionRegistry>) -> Self {
        let tools = vec![
            ToolDescriptor {
                name: "discover_action_types",
                description: "List action types with their ports and config fields",
                parameters: json!({"type": "object", "properties": {}}),
            },
            ToolDescriptor {
                name: "validate_workflow",
                description: "Validate a workflow graph without saving it",
                parameters: workflow_schema(false),
            },
            ToolDescriptor {
                name: "preview_workflow",
                description: "Validate a workflow and diff it against the saved version of rule_id, if given",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "workflow": {"type": "object"},
                        "rule_id": {"type": "string", "format": "uuid"}
                    },
                    "required": ["workflow"]
                }),
            },
            ToolDescriptor {
                name: "create_workflow",
                description: "Create a rule with its full action graph",
                parameters: workflow_schema(false),
            },
            ToolDescriptor {
                name: "update_workflow",
                description: "Replace the action graph of an existing rule",
                parameters: workflow_schema(true),
            },
        ];
        Self { orchestrator, registry, tools }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Table grants a caller needs before invoking `name`
    pub fn required_grants(&self, name: &str) -> WorkflowResult<&'static [(WorkflowTable, TableOp)]> {
        match name {
            "discover_action_types" | "validate_workflow" => Ok(RULES_READ),
            "preview_workflow" => Ok(GRAPH_READ),
            "create_workflow" => Ok(GRAPH_CREATE),
            "update_workflow" => Ok(GRAPH_REPLACE),
            other => Err(WorkflowError::NotFound(format!("Tool {}", other))),
        }
    }

    pub async fn invoke(&self, name: &str, args: Value, actor: Option<Uuid>) -> WorkflowResult<Value> {
        let parse = |args: Value| -> WorkflowResult<WorkflowArgs> {
            serde_json::from_value(args)
                .map_err(|e| WorkflowError::InvalidArgument(format!("bad arguments for {}: {}", name, e)))
        };

        let result = match name {
            "discover_action_types" => {
                let types: Vec<_> = self.registry.descriptors().collect();
                json!({ "action_types": types })
            }
            "validate_workflow" => {
                let args = parse(args)?;
                json!(self.orchestrator.validate(&args.workflow))
            }
            "preview_workflow" => {
                let args = parse(args)?;
                json!(self.orchestrator.preview(args.rule_id, &args.workflow).await?)
            }
            "create_workflow" => {
                let args = parse(args)?;
                json!(self.orchestrator.save(None, args.workflow, false, actor).await?)
            }
            "update_workflow" => {
                let args = parse(args)?;
                let rule_id = args.rule_id.ok_or_else(|| {
                    WorkflowError::InvalidArgument("update_workflow needs rule_id".to_string())
                })?;
                json!(self.orchestrator.save(Some(rule_id), args.workflow, false, actor).await?)
            }
            other => return Err(WorkflowError::NotFound(format!("Tool {}", other))),
        };
        Ok(result)
    }
}
