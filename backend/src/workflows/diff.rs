//! Structured difference between a persisted graph and a proposed save,
//! shown to a human before an agent-proposed change is applied.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};

use super::model::{EdgeInput, SaveWorkflowRequest};
use super::registry::ActionRegistry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionSummary {
    pub key: String,
    pub action_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionChange {
    pub key: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeSummary {
    /// `None` for the start edge
    pub source: Option<String>,
    pub target: String,
    pub port: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphDiff {
    pub rule_changes: Vec<FieldChange>,
    pub added_actions: Vec<ActionSummary>,
    pub removed_actions: Vec<ActionSummary>,
    pub changed_actions: Vec<ActionChange>,
    pub added_edges: Vec<EdgeSummary>,
    pub removed_edges: Vec<EdgeSummary>,
}

impl GraphDiff {
    pub fn is_empty(&self) -> bool {
        self.rule_changes.is_empty()
            && self.added_actions.is_empty()
            && self.removed_actions.is_empty()
            && self.changed_actions.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

fn change(field: &str, before: Value, after: Value, out: &mut Vec<FieldChange>) {
    if before != after {
        out.push(FieldChange {
            field: field.to_string(),
            before,
            after,
        });
    }
}

/// Edge signatures with the source type's default port filled in
fn edge_set(request: &SaveWorkflowRequest, registry: &ActionRegistry) -> BTreeSet<EdgeSummary> {
    let types: HashMap<&str, &str> = request
        .actions
        .iter()
        .map(|a| (a.key.as_str(), a.action_type.as_str()))
        .collect();

    request
        .edges
        .iter()
        .map(|edge: &EdgeInput| {
            let port = match &edge.source_key {
                None => None,
                Some(source) => edge.source_output_port.clone().or_else(|| {
                    types
                        .get(source.as_str())
                        .and_then(|t| registry.descriptor(t))
                        .map(|d| d.default_port.to_string())
                }),
            };
            EdgeSummary {
                source: edge.source_key.clone(),
                target: edge.target_key.clone(),
                port,
            }
        })
        .collect()
}

/// Compare a proposed save against the current graph, expressed as a request
/// keyed by persisted IDs. Proposed actions match current ones by key.
pub fn diff(
    current: Option<&SaveWorkflowRequest>,
    proposed: &SaveWorkflowRequest,
    registry: &ActionRegistry,
) -> GraphDiff {
    let mut result = GraphDiff::default();

    let Some(current) = current else {
        result.added_actions = proposed
            .actions
            .iter()
            .map(|a| ActionSummary { key: a.key.clone(), action_type: a.action_type.clone() })
            .collect();
        result.added_edges = edge_set(proposed, registry).into_iter().collect();
        return result;
    };

    change("name", json!(current.name), json!(proposed.name), &mut result.rule_changes);
    change(
        "description",
        json!(current.description),
        json!(proposed.description),
        &mut result.rule_changes,
    );
    change(
        "trigger_type",
        json!(current.trigger_type),
        json!(proposed.trigger_type),
        &mut result.rule_changes,
    );
    change("entity", json!(current.entity), json!(proposed.entity), &mut result.rule_changes);
    change(
        "is_active",
        json!(current.is_active),
        json!(proposed.is_active),
        &mut result.rule_changes,
    );

    let existing: HashMap<&str, _> = current.actions.iter().map(|a| (a.key.as_str(), a)).collect();
    let mut matched = BTreeSet::new();
    for action in &proposed.actions {
        match existing.get(action.key.as_str()) {
            None => result.added_actions.push(ActionSummary {
                key: action.key.clone(),
                action_type: action.action_type.clone(),
            }),
            Some(before) => {
                matched.insert(action.key.as_str());
                let mut changes = Vec::new();
                change("action_type", json!(before.action_type), json!(action.action_type), &mut changes);
                change("name", json!(before.name), json!(action.name), &mut changes);
                change("config", before.config.clone(), action.config.clone(), &mut changes);
                if action.position.is_some() {
                    change("position", json!(before.position), json!(action.position), &mut changes);
                }
                if !changes.is_empty() {
                    result.changed_actions.push(ActionChange { key: action.key.clone(), changes });
                }
            }
        }
    }
    result.removed_actions = current
        .actions
        .iter()
        .filter(|a| !matched.contains(a.key.as_str()))
        .map(|a| ActionSummary { key: a.key.clone(), action_type: a.action_type.clone() })
        .collect();

    let before = edge_set(current, registry);
    let after = edge_set(proposed, registry);
    result.added_edges = after.difference(&before).cloned().collect();
    result.removed_edges = before.difference(&after).cloned().collect();

    result
}
