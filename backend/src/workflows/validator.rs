//! DAG validator
//!
//! A pure check of a candidate rule and its action graph. It never stops at
//! the first problem: every violation is collected so one round trip shows
//! the editor everything that needs fixing.
//!
//! Checks run in a fixed order: action types and configs, edge endpoints,
//! output ports, start edge count, then acyclicity. Actions that cannot be
//! reached from the start edge are reported as warnings only.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use super::model::{SaveWorkflowRequest, ValidationIssue, ValidationResult};
use super::registry::ActionRegistry;

pub const MAX_NAME_LEN: usize = 255;

pub mod codes {
    pub const UNKNOWN_ACTION_TYPE: &str = "unknown_action_type";
    pub const INVALID_CONFIG: &str = "invalid_config";
    pub const DUPLICATE_ACTION_KEY: &str = "duplicate_action_key";
    pub const UNKNOWN_SOURCE_ACTION: &str = "unknown_source_action";
    pub const UNKNOWN_TARGET_ACTION: &str = "unknown_target_action";
    pub const INVALID_OUTPUT_PORT: &str = "invalid_output_port";
    pub const MISSING_START_EDGE: &str = "missing_start_edge";
    pub const MULTIPLE_START_EDGES: &str = "multiple_start_edges";
    pub const CYCLE_DETECTED: &str = "cycle_detected";
    pub const SELF_LOOP: &str = "self_loop";
    pub const DUPLICATE_EDGE: &str = "duplicate_edge";
    pub const EMPTY_ACTIVE_RULE: &str = "empty_active_rule";
    pub const INVALID_RULE: &str = "invalid_rule";
    pub const UNREACHABLE_ACTION: &str = "unreachable_action";
}

/// Bare or schema-qualified table name
static ENTITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("entity pattern is a valid regex")
});

/// An edge whose endpoints both resolved to submitted actions
struct ResolvedEdge {
    index: usize,
    source: Option<usize>,
    target: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    OnStack,
    Done,
}

pub fn validate(request: &SaveWorkflowRequest, registry: &ActionRegistry) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_rule(request, &mut errors);

    // (a) action types and configs
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, action) in request.actions.iter().enumerate() {
        if let Some(first) = index.get(action.key.as_str()) {
            errors.push(ValidationIssue::new(
                format!("actions[{}].key", i),
                codes::DUPLICATE_ACTION_KEY,
                format!("key '{}' is already used by actions[{}]", action.key, first),
            ));
        } else {
            index.insert(action.key.as_str(), i);
        }

        match registry.get(&action.action_type) {
            None => errors.push(ValidationIssue::new(
                format!("actions[{}].action_type", i),
                codes::UNKNOWN_ACTION_TYPE,
                format!("action type '{}' is not registered", action.action_type),
            )),
            Some(handler) => {
                for issue in handler.validate_config(&action.config) {
                    let field = if issue.field.is_empty() {
                        format!("actions[{}].config", i)
                    } else {
                        format!("actions[{}].config.{}", i, issue.field)
                    };
                    errors.push(ValidationIssue::new(field, codes::INVALID_CONFIG, issue.message));
                }
            }
        }
    }

    // (b) edge endpoints
    let mut resolved = Vec::with_capacity(request.edges.len());
    for (j, edge) in request.edges.iter().enumerate() {
        let label = edge.label(j);
        let source = match &edge.source_key {
            None => Some(None),
            Some(key) => match index.get(key.as_str()) {
                Some(&i) => Some(Some(i)),
                None => {
                    errors.push(ValidationIssue::new(
                        format!("edges[{}].source_key", j),
                        codes::UNKNOWN_SOURCE_ACTION,
                        format!("edge {} starts at unknown action '{}'", label, key),
                    ));
                    None
                }
            },
        };
        let target = match index.get(edge.target_key.as_str()) {
            Some(&i) => Some(i),
            None => {
                errors.push(ValidationIssue::new(
                    format!("edges[{}].target_key", j),
                    codes::UNKNOWN_TARGET_ACTION,
                    format!("edge {} points to unknown action '{}'", label, edge.target_key),
                ));
                None
            }
        };
        if let (Some(source), Some(target)) = (source, target) {
            resolved.push(ResolvedEdge { index: j, source, target });
        }
    }

    // (c) output ports, self loops and duplicates
    let mut seen = HashSet::new();
    for e in &resolved {
        let edge = &request.edges[e.index];
        let label = edge.label(e.index);
        let Some(source) = e.source else {
            if let Some(port) = &edge.source_output_port {
                errors.push(ValidationIssue::new(
                    format!("edges[{}].source_output_port", e.index),
                    codes::INVALID_OUTPUT_PORT,
                    format!("start edge {} cannot use output port '{}'", label, port),
                ));
            }
            continue;
        };

        let source_action = &request.actions[source];
        let descriptor = registry.descriptor(&source_action.action_type);
        if let (Some(port), Some(descriptor)) = (&edge.source_output_port, descriptor) {
            if !descriptor.declares_port(port) {
                errors.push(ValidationIssue::new(
                    format!("edges[{}].source_output_port", e.index),
                    codes::INVALID_OUTPUT_PORT,
                    format!(
                        "edge {} uses port '{}' but '{}' only declares [{}]",
                        label,
                        port,
                        source_action.action_type,
                        descriptor.ports.join(", ")
                    ),
                ));
            }
        }

        if source == e.target {
            errors.push(ValidationIssue::new(
                format!("edges[{}]", e.index),
                codes::SELF_LOOP,
                format!("edge {} connects action '{}' to itself", label, source_action.key),
            ));
            continue;
        }

        let port = edge
            .source_output_port
            .clone()
            .or_else(|| descriptor.map(|d| d.default_port.to_string()))
            .unwrap_or_default();
        if !seen.insert((source, e.target, port.clone())) {
            errors.push(ValidationIssue::new(
                format!("edges[{}]", e.index),
                codes::DUPLICATE_EDGE,
                format!(
                    "edge {} repeats '{}' -[{}]-> '{}'",
                    label, source_action.key, port, request.actions[e.target].key
                ),
            ));
        }
    }

    // (d) exactly one start edge
    let starts: Vec<String> = request
        .edges
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_start())
        .map(|(j, e)| e.label(j))
        .collect();
    if starts.is_empty() && !request.actions.is_empty() {
        errors.push(ValidationIssue::new(
            "edges",
            codes::MISSING_START_EDGE,
            "rule has no start edge (an edge without source_key)",
        ));
    } else if starts.len() > 1 {
        errors.push(ValidationIssue::new(
            "edges",
            codes::MULTIPLE_START_EDGES,
            format!("rule has {} start edges: {}", starts.len(), starts.join(", ")),
        ));
    }

    // (e) acyclicity and reachability
    let node_count = request.actions.len();
    let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); node_count];
    let mut roots = Vec::new();
    for e in &resolved {
        match e.source {
            None => roots.push((e.target, e.index)),
            Some(source) if source != e.target => adjacency[source].push((e.target, e.index)),
            Some(_) => {}
        }
    }

    let mut state = vec![Visit::Unseen; node_count];
    let mut entered_by: Vec<Option<usize>> = vec![None; node_count];
    let mut cycles = Vec::new();
    for &(root, edge) in &roots {
        walk(root, Some(edge), &adjacency, &mut state, &mut entered_by, &mut cycles);
    }

    if !roots.is_empty() {
        for (i, action) in request.actions.iter().enumerate() {
            if state[i] == Visit::Unseen {
                warnings.push(ValidationIssue::new(
                    format!("actions[{}]", i),
                    codes::UNREACHABLE_ACTION,
                    format!("action '{}' cannot be reached from the start edge", action.key),
                ));
            }
        }
    }

    // Cycles in the unreachable part of the graph still make it invalid
    for node in 0..node_count {
        walk(node, None, &adjacency, &mut state, &mut entered_by, &mut cycles);
    }

    for (closing, node) in cycles {
        let entry = match entered_by[node] {
            Some(edge) => format!("edge {}", request.edges[edge].label(edge)),
            None => "no incoming edge on this walk".to_string(),
        };
        errors.push(ValidationIssue::new(
            format!("edges[{}]", closing),
            codes::CYCLE_DETECTED,
            format!(
                "edge {} closes a cycle back to action '{}', which was entered via {}",
                request.edges[closing].label(closing),
                request.actions[node].key,
                entry
            ),
        ));
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_rule(request: &SaveWorkflowRequest, errors: &mut Vec<ValidationIssue>) {
    let name = request.name.trim();
    if name.is_empty() {
        errors.push(ValidationIssue::new("name", codes::INVALID_RULE, "name must not be empty"));
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(ValidationIssue::new(
            "name",
            codes::INVALID_RULE,
            format!("name must be at most {} characters", MAX_NAME_LEN),
        ));
    }

    if !ENTITY_PATTERN.is_match(&request.entity) {
        errors.push(ValidationIssue::new(
            "entity",
            codes::INVALID_RULE,
            format!("'{}' is not a table name or schema.table", request.entity),
        ));
    }

    if request.is_active && request.actions.is_empty() {
        errors.push(ValidationIssue::new(
            "actions",
            codes::EMPTY_ACTIVE_RULE,
            "an active rule needs at least one action; save it inactive as a draft",
        ));
    }
}

/// Iterative depth-first walk recording `(closing_edge, revisited_node)` for
/// every edge that returns to a node still on the recursion stack
fn walk(
    root: usize,
    entered: Option<usize>,
    adjacency: &[Vec<(usize, usize)>],
    state: &mut [Visit],
    entered_by: &mut [Option<usize>],
    cycles: &mut Vec<(usize, usize)>,
) {
    if state[root] != Visit::Unseen {
        return;
    }
    state[root] = Visit::OnStack;
    entered_by[root] = entered;

    let mut stack = vec![(root, 0usize)];
    while let Some(top) = stack.last_mut() {
        let node = top.0;
        match adjacency[node].get(top.1) {
            Some(&(child, edge)) => {
                top.1 += 1;
                match state[child] {
                    Visit::Unseen => {
                        state[child] = Visit::OnStack;
                        entered_by[child] = Some(edge);
                        stack.push((child, 0));
                    }
                    Visit::OnStack => cycles.push((edge, child)),
                    Visit::Done => {}
                }
            }
            None => {
                state[node] = Visit::Done;
                stack.pop();
            }
        }
    }
}
