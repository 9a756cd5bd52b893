// Workflow Executor - walks a rule's action graph for one change event

use regex::Regex;
use ruleflow_shared::{ChangeEvent, WorkflowGraph};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::actions::PORT_FAILURE;
use super::execution::ExecutionService;
use super::registry::{ActionRegistry, ExecutionContext};
use crate::store::StoreError;

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("template pattern is a valid regex")
});

/// Resolve `{{path}}` placeholders in every string of a config document.
/// A string that is exactly one placeholder takes the referenced JSON value
/// as-is; unresolved placeholders are left in place.
pub fn render_config(config: &Value, ctx: &ExecutionContext) -> Value {
    match config {
        Value::String(s) => render_string(s, ctx),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_config(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_config(v, ctx)).collect()),
        _ => config.clone(),
    }
}

fn render_string(template: &str, ctx: &ExecutionContext) -> Value {
    if let Some(caps) = TEMPLATE.captures(template) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(template.len()) {
            if let Some(value) = ctx.lookup(&caps[1]) {
                return value;
            }
        }
    }

    let rendered = TEMPLATE.replace_all(template, |caps: &regex::Captures| {
        match ctx.lookup(&caps[1]) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    });
    Value::String(rendered.into_owned())
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("graph cannot be run: {0}")]
    InvalidGraph(String),

    #[error("run exceeded {0} steps")]
    StepLimit(usize),

    #[error("run state unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("action {action_id} ({action_type}) failed: {message}")]
    ActionFailed {
        action_id: Uuid,
        action_type: String,
        message: String,
    },
}

impl RunError {
    /// Handler failures may be transient; structural problems are not
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ActionFailed { .. } | Self::Store(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub action_id: Uuid,
    pub action_type: String,
    pub execution_id: Uuid,
    pub port: String,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub rule_id: Uuid,
    pub event_id: Uuid,
    pub steps: Vec<StepRecord>,
}

pub struct GraphRunner {
    registry: Arc<ActionRegistry>,
    executions: ExecutionService,
    max_steps: usize,
}

impl GraphRunner {
    pub fn new(registry: Arc<ActionRegistry>, executions: ExecutionService, max_steps: usize) -> Self {
        Self {
            registry,
            executions,
            max_steps,
        }
    }

    /// Run the graph from its start edge. Each action executes at most once
    /// per run; an outgoing edge is followed when its port (or the source
    /// type's default port) equals the port the action chose.
    pub async fn run(&self, graph: &WorkflowGraph, event: &ChangeEvent) -> Result<RunReport, RunError> {
        let rule_id = graph.rule.id;
        let start = graph
            .start_edge()
            .ok_or_else(|| RunError::InvalidGraph("rule has no start edge".to_string()))?;

        let mut report = RunReport {
            rule_id,
            event_id: event.event_id,
            steps: Vec::new(),
        };
        // A retry resumes: steps that succeeded before are not executed again
        let mut completed = self.executions.succeeded_steps(event.event_id, rule_id).await?;
        if !completed.is_empty() {
            debug!(%rule_id, event_id = %event.event_id, reused = completed.len(), "resuming rule run");
        }
        let mut variables: HashMap<String, Value> = HashMap::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start.target_action_id]);

        while let Some(action_id) = queue.pop_front() {
            if !visited.insert(action_id) {
                continue;
            }
            if report.steps.len() >= self.max_steps {
                return Err(RunError::StepLimit(self.max_steps));
            }

            let action = graph.action(action_id).ok_or_else(|| {
                RunError::InvalidGraph(format!("edge points to missing action {}", action_id))
            })?;
            let handler = self.registry.get(&action.action_type).cloned().ok_or_else(|| {
                RunError::InvalidGraph(format!("action type '{}' is not registered", action.action_type))
            })?;
            let descriptor = handler.descriptor();

            let reused = completed.remove(&action_id);
            let (port, failed, execution_id) = if let Some((execution_id, outcome)) = reused {
                debug!(%rule_id, %action_id, %execution_id, "step already succeeded, reusing outcome");
                variables.extend(outcome.variables);
                (outcome.port, false, execution_id)
            } else {
                let ctx = ExecutionContext {
                    execution_id: Uuid::new_v4(),
                    requested_by: None,
                    rule_id: Some(rule_id),
                    action_id: Some(action.id),
                    event_id: Some(event.event_id),
                    payload: event.payload.clone(),
                    variables: variables.clone(),
                };
                let execution_id = ctx.execution_id;
                let config = render_config(&action.config, &ctx);
                debug!(%rule_id, %action_id, action_type = %action.action_type, "executing step");

                let (port, failed) = match self.executions.run_step(handler.clone(), config, ctx).await {
                    Ok(outcome) => {
                        variables.extend(outcome.variables);
                        (outcome.port, false)
                    }
                    Err(err) => {
                        let message = err.to_string();
                        let failure_wired = descriptor.declares_port(PORT_FAILURE)
                            && graph
                                .outgoing(action.id)
                                .any(|e| e.source_output_port.as_deref() == Some(PORT_FAILURE));
                        if !failure_wired {
                            return Err(RunError::ActionFailed {
                                action_id,
                                action_type: action.action_type.clone(),
                                message,
                            });
                        }
                        warn!(%rule_id, %action_id, error = %message, "step failed, following failure port");
                        variables.insert("last_error".to_string(), json!(message));
                        (PORT_FAILURE.to_string(), true)
                    }
                };
                (port, failed, execution_id)
            };

            for edge in graph.outgoing(action.id) {
                let edge_port = edge
                    .source_output_port
                    .as_deref()
                    .unwrap_or(descriptor.default_port);
                if edge_port == port {
                    queue.push_back(edge.target_action_id);
                }
            }

            report.steps.push(StepRecord {
                action_id,
                action_type: action.action_type.clone(),
                execution_id,
                port,
                failed,
            });
        }

        info!(%rule_id, event_id = %event.event_id, steps = report.steps.len(), "rule run finished");
        Ok(report)
    }
}
