//! Transactional save orchestrator
//!
//! The only writer of whole rule graphs. A save validates the submitted
//! graph, resolves caller-local action keys to freshly generated IDs, then
//! hands the resolved plan to the store, which writes it in one transaction:
//! upsert rule, delete stale graph (update only), insert actions, insert
//! edges. A dry run stops after validation.

use chrono::Utc;
use ruleflow_shared::{Action, ActionEdge, AutomationRule, WorkflowGraph};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::diff::{diff, GraphDiff};
use super::model::{CreateEdgeRequest, SaveWorkflowRequest, SaveWorkflowResponse, ValidationResult};
use super::registry::ActionRegistry;
use super::validator::{validate, MAX_NAME_LEN};
use super::{WorkflowError, WorkflowResult};
use crate::store::{GraphPlan, SaveMode, WorkflowStore};

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    pub validation: ValidationResult,
    pub diff: GraphDiff,
}

#[derive(Clone)]
pub struct SaveOrchestrator {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<ActionRegistry>,
}

impl SaveOrchestrator {
    pub fn new(store: Arc<dyn WorkflowStore>, registry: Arc<ActionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn validate(&self, request: &SaveWorkflowRequest) -> ValidationResult {
        validate(request, &self.registry)
    }

    /// Create (`rule_id = None`) or wholly replace a rule's graph
    pub async fn save(
        &self,
        rule_id: Option<Uuid>,
        request: SaveWorkflowRequest,
        dry_run: bool,
        actor: Option<Uuid>,
    ) -> WorkflowResult<SaveWorkflowResponse> {
        if let Some(id) = rule_id {
            self.require_rule(id).await?;
        }

        let validation = self.validate(&request);
        if !validation.valid || dry_run {
            return Ok(SaveWorkflowResponse::unsaved(validation, dry_run));
        }

        let mode = match rule_id {
            None => SaveMode::Create,
            Some(_) => SaveMode::Replace {
                expected_version: request.expected_version,
            },
        };
        let plan = self.plan(mode, rule_id.unwrap_or_else(Uuid::new_v4), &request, actor)?;
        let graph = self.store.commit_graph(plan).await?;
        info!(
            rule_id = %graph.rule.id,
            version = graph.rule.version,
            actions = graph.actions.len(),
            edges = graph.edges.len(),
            "workflow saved"
        );

        Ok(SaveWorkflowResponse {
            valid: true,
            dry_run: false,
            errors: Vec::new(),
            warnings: validation.warnings,
            workflow: Some(graph),
        })
    }

    /// Resolve keys to new IDs and fill in default ports
    fn plan(
        &self,
        mode: SaveMode,
        rule_id: Uuid,
        request: &SaveWorkflowRequest,
        actor: Option<Uuid>,
    ) -> WorkflowResult<GraphPlan> {
        let now = Utc::now();
        let mut ids: HashMap<&str, Uuid> = HashMap::new();
        let mut types: HashMap<&str, &str> = HashMap::new();
        let actions: Vec<Action> = request
            .actions
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let id = Uuid::new_v4();
                ids.insert(input.key.as_str(), id);
                types.insert(input.key.as_str(), input.action_type.as_str());
                Action {
                    id,
                    rule_id,
                    action_type: input.action_type.clone(),
                    name: input.name.clone(),
                    config: input.config.clone(),
                    position: input.position.unwrap_or(i as i32),
                    created_at: now,
                }
            })
            .collect();

        let resolve = |key: &str| {
            ids.get(key).copied().ok_or_else(|| {
                WorkflowError::FailedPrecondition(format!("edge references unknown action key '{}'", key))
            })
        };

        let mut edges = Vec::with_capacity(request.edges.len());
        for input in &request.edges {
            let (source_action_id, source_output_port) = match &input.source_key {
                None => (None, None),
                Some(key) => {
                    let port = match &input.source_output_port {
                        Some(port) => port.clone(),
                        None => types
                            .get(key.as_str())
                            .and_then(|t| self.registry.descriptor(t))
                            .map(|d| d.default_port.to_string())
                            .ok_or_else(|| {
                                WorkflowError::FailedPrecondition(format!(
                                    "no default port for action '{}'",
                                    key
                                ))
                            })?,
                    };
                    (Some(resolve(key)?), Some(port))
                }
            };
            edges.push(ActionEdge {
                id: Uuid::new_v4(),
                rule_id,
                source_action_id,
                target_action_id: resolve(&input.target_key)?,
                source_output_port,
                created_at: now,
            });
        }

        Ok(GraphPlan {
            mode,
            rule_id,
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            trigger_type: request.trigger_type,
            entity: request.entity.clone(),
            is_active: request.is_active,
            actor,
            actions,
            edges,
        })
    }

    pub async fn get_workflow(&self, rule_id: Uuid) -> WorkflowResult<WorkflowGraph> {
        self.store
            .load_graph(rule_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Rule {}", rule_id)))
    }

    pub async fn list_rules(&self) -> WorkflowResult<Vec<AutomationRule>> {
        Ok(self.store.list_rules().await?)
    }

    /// Delete a rule; its actions and edges go with it
    pub async fn delete_rule(&self, rule_id: Uuid) -> WorkflowResult<()> {
        if !self.store.delete_rule(rule_id).await? {
            return Err(WorkflowError::NotFound(format!("Rule {}", rule_id)));
        }
        info!(%rule_id, "workflow deleted");
        Ok(())
    }

    /// Deep-copy a rule into a new, inactive rule with fresh IDs
    pub async fn duplicate(&self, rule_id: Uuid, actor: Option<Uuid>) -> WorkflowResult<WorkflowGraph> {
        let source = self.get_workflow(rule_id).await?;
        let new_rule_id = Uuid::new_v4();
        let now = Utc::now();

        let translation: HashMap<Uuid, Uuid> = source
            .actions
            .iter()
            .map(|a| (a.id, Uuid::new_v4()))
            .collect();
        let translate = |old: Uuid| {
            translation.get(&old).copied().ok_or_else(|| {
                WorkflowError::FailedPrecondition(format!(
                    "rule {} has an edge to action {} outside its graph",
                    rule_id, old
                ))
            })
        };

        let actions = source
            .actions
            .iter()
            .map(|a| -> WorkflowResult<Action> {
                Ok(Action {
                    id: translate(a.id)?,
                    rule_id: new_rule_id,
                    created_at: now,
                    ..a.clone()
                })
            })
            .collect::<WorkflowResult<Vec<_>>>()?;

        let edges = source
            .edges
            .iter()
            .map(|e| -> WorkflowResult<ActionEdge> {
                Ok(ActionEdge {
                    id: Uuid::new_v4(),
                    rule_id: new_rule_id,
                    source_action_id: e.source_action_id.map(&translate).transpose()?,
                    target_action_id: translate(e.target_action_id)?,
                    source_output_port: e.source_output_port.clone(),
                    created_at: now,
                })
            })
            .collect::<WorkflowResult<Vec<_>>>()?;

        let plan = GraphPlan {
            mode: SaveMode::Create,
            rule_id: new_rule_id,
            name: copy_name(&source.rule.name),
            description: source.rule.description.clone(),
            trigger_type: source.rule.trigger_type,
            entity: source.rule.entity.clone(),
            is_active: false,
            actor,
            actions,
            edges,
        };
        let copy = self.store.commit_graph(plan).await?;
        info!(source_rule_id = %rule_id, rule_id = %copy.rule.id, "workflow duplicated");
        Ok(copy)
    }

    /// Run the validator and diff against the persisted graph without writing
    pub async fn preview(
        &self,
        rule_id: Option<Uuid>,
        request: &SaveWorkflowRequest,
    ) -> WorkflowResult<PreviewResponse> {
        let current = match rule_id {
            Some(id) => Some(SaveWorkflowRequest::from_graph(&self.get_workflow(id).await?)),
            None => None,
        };
        Ok(PreviewResponse {
            validation: self.validate(request),
            diff: diff(current.as_ref(), request, &self.registry),
        })
    }

    // ===== Single-edge operations =====

    pub async fn list_edges(&self, rule_id: Uuid) -> WorkflowResult<Vec<ActionEdge>> {
        self.require_rule(rule_id).await?;
        Ok(self.store.list_edges(rule_id).await?)
    }

    /// Add one edge, re-checking the graph invariants the full save enforces
    pub async fn create_edge(
        &self,
        rule_id: Uuid,
        request: CreateEdgeRequest,
    ) -> WorkflowResult<ActionEdge> {
        self.require_rule(rule_id).await?;

        let target = self.rule_action(rule_id, request.target_action_id).await?;
        let source_output_port = match request.source_action_id {
            None => {
                if request.source_output_port.is_some() {
                    return Err(WorkflowError::FailedPrecondition(
                        "the start edge cannot name an output port".to_string(),
                    ));
                }
                None
            }
            Some(source_id) => {
                if source_id == target.id {
                    return Err(WorkflowError::FailedPrecondition(format!(
                        "action {} cannot connect to itself",
                        source_id
                    )));
                }
                let source = self.rule_action(rule_id, source_id).await?;
                let descriptor = self.registry.descriptor(&source.action_type).ok_or_else(|| {
                    WorkflowError::FailedPrecondition(format!(
                        "action type '{}' is not registered",
                        source.action_type
                    ))
                })?;
                let port = request
                    .source_output_port
                    .clone()
                    .unwrap_or_else(|| descriptor.default_port.to_string());
                if !descriptor.declares_port(&port) {
                    return Err(WorkflowError::FailedPrecondition(format!(
                        "'{}' has no output port '{}' (declared: {})",
                        source.action_type,
                        port,
                        descriptor.ports.join(", ")
                    )));
                }
                Some(port)
            }
        };

        let existing = self.store.list_edges(rule_id).await?;
        match request.source_action_id {
            None => {
                if existing.iter().any(|e| e.is_start()) {
                    return Err(WorkflowError::FailedPrecondition(
                        "rule already has a start edge".to_string(),
                    ));
                }
            }
            Some(source_id) => {
                if existing.iter().any(|e| {
                    e.source_action_id == Some(source_id)
                        && e.target_action_id == target.id
                        && e.source_output_port == source_output_port
                }) {
                    return Err(WorkflowError::FailedPrecondition("edge already exists".to_string()));
                }
                if reaches(&existing, target.id, source_id) {
                    return Err(WorkflowError::FailedPrecondition(format!(
                        "edge {} -> {} would create a cycle",
                        source_id, target.id
                    )));
                }
            }
        }

        let edge = self
            .store
            .insert_edge(ActionEdge {
                id: Uuid::new_v4(),
                rule_id,
                source_action_id: request.source_action_id,
                target_action_id: target.id,
                source_output_port,
                created_at: Utc::now(),
            })
            .await?;
        info!(%rule_id, edge_id = %edge.id, "edge created");
        Ok(edge)
    }

    pub async fn delete_edge(&self, rule_id: Uuid, edge_id: Uuid) -> WorkflowResult<()> {
        if !self.store.delete_edge(rule_id, edge_id).await? {
            return Err(WorkflowError::NotFound(format!("Edge {}", edge_id)));
        }
        Ok(())
    }

    pub async fn delete_all_edges(&self, rule_id: Uuid) -> WorkflowResult<u64> {
        self.require_rule(rule_id).await?;
        let removed = self.store.delete_all_edges(rule_id).await?;
        info!(%rule_id, removed, "edges cleared");
        Ok(removed)
    }

    async fn require_rule(&self, rule_id: Uuid) -> WorkflowResult<AutomationRule> {
        self.store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Rule {}", rule_id)))
    }

    /// Load an action and insist it belongs to `rule_id`
    async fn rule_action(&self, rule_id: Uuid, action_id: Uuid) -> WorkflowResult<Action> {
        let action = self
            .store
            .get_action(action_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Action {}", action_id)))?;
        if action.rule_id != rule_id {
            return Err(WorkflowError::FailedPrecondition(format!(
                "action {} belongs to rule {}, not {}",
                action_id, action.rule_id, rule_id
            )));
        }
        Ok(action)
    }
}

fn copy_name(name: &str) -> String {
    const SUFFIX: &str = " (copy)";
    let room = MAX_NAME_LEN - SUFFIX.len();
    let base: String = name.chars().take(room).collect();
    format!("{}{}", base, SUFFIX)
}

/// Whether `to` is reachable from `from` along existing edges
fn reaches(edges: &[ActionEdge], from: Uuid, to: Uuid) -> bool {
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        for edge in edges.iter().filter(|e| e.source_action_id == Some(node)) {
            if seen.insert(edge.target_action_id) {
                queue.push_back(edge.target_action_id);
            }
        }
    }
    false
}
