// Invariants that hold for every graph the save pipeline accepts

use fake::Fake;
use futures::future::join_all;
use ruleflow_shared::{TriggerType, WorkflowGraph};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use crate::store::{MemoryWorkflowStore, StoreError, WorkflowStore};
use crate::tests::fixtures::{rule_name, two_step_request};
use crate::workflows::validator::{codes, validate};
use crate::workflows::{
    ActionInput, ActionRegistry, EdgeInput, SaveOrchestrator, SaveWorkflowRequest, WorkflowError,
};

fn services() -> (Arc<MemoryWorkflowStore>, Arc<ActionRegistry>, SaveOrchestrator) {
    let store = Arc::new(MemoryWorkflowStore::new());
    let registry = Arc::new(ActionRegistry::builtin(store.clone(), reqwest::Client::new()).unwrap());
    let orchestrator = SaveOrchestrator::new(store.clone(), registry.clone());
    (store, registry, orchestrator)
}

/// Random DAG: edges only run from lower to higher index, so it is acyclic
fn random_dag() -> SaveWorkflowRequest {
    let count: usize = (2..9).fake();
    let actions = (0..count)
        .map(|i| ActionInput {
            key: format!("n{}", i),
            action_type: "set_variable".to_string(),
            name: None,
            config: json!({"name": format!("v{}", i), "value": i}),
            position: None,
        })
        .collect();

    let mut seen = HashSet::new();
    let mut edges = vec![EdgeInput::start("n0")];
    for target in 1..count {
        // Every node gets at least one parent, so all are reachable
        let source: usize = (0..target).fake();
        seen.insert((source, target));
        edges.push(EdgeInput::link(&format!("n{}", source), &format!("n{}", target), None));
    }
    let extra: usize = (0..count).fake();
    for _ in 0..extra {
        let a: usize = (0..count).fake();
        let b: usize = (0..count).fake();
        let (source, target) = (a.min(b), a.max(b));
        if source != target && seen.insert((source, target)) {
            edges.push(EdgeInput::link(&format!("n{}", source), &format!("n{}", target), None));
        }
    }

    SaveWorkflowRequest {
        name: rule_name(),
        description: None,
        trigger_type: TriggerType::OnUpdate,
        entity: "inventory.items".to_string(),
        is_active: true,
        expected_version: None,
        actions,
        edges,
    }
}

fn assert_persisted_invariants(graph: &WorkflowGraph) {
    assert_eq!(graph.edges.iter().filter(|e| e.is_start()).count(), 1);
    let action_ids: HashSet<Uuid> = graph.actions.iter().map(|a| a.id).collect();
    for edge in &graph.edges {
        assert_eq!(edge.rule_id, graph.rule.id);
        assert!(action_ids.contains(&edge.target_action_id));
        match edge.source_action_id {
            Some(source) => {
                assert!(action_ids.contains(&source));
                assert!(edge.source_output_port.is_some());
            }
            None => assert!(edge.source_output_port.is_none()),
        }
    }
}

#[test]
fn test_random_dags_validate_and_back_edges_do_not() {
    let (_, registry, _) = services();
    for _ in 0..25 {
        let mut request = random_dag();
        let result = validate(&request, &registry);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());

        // Any edge from the last node back to the first closes a cycle
        let last = format!("n{}", request.actions.len() - 1);
        request.edges.push(EdgeInput::link(&last, "n0", None));
        assert!(validate(&request, &registry).has_error(codes::CYCLE_DETECTED));
    }
}

#[tokio::test]
async fn test_saved_graphs_keep_invariants() {
    let (store, _, orchestrator) = services();
    for _ in 0..10 {
        let request = random_dag();
        let expected_edges = request.edges.len();
        let saved = orchestrator.save(None, request, false, None).await.unwrap();
        let graph = store
            .load_graph(saved.workflow.unwrap().rule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(graph.edges.len(), expected_edges);
        assert_persisted_invariants(&graph);
    }
}

#[tokio::test]
async fn test_dry_run_leaves_store_untouched() {
    let (store, _, orchestrator) = services();
    let created = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();
    let before = store.load_graph(created.rule.id).await.unwrap();

    let response = orchestrator
        .save(Some(created.rule.id), random_dag(), true, None)
        .await
        .unwrap();
    assert!(response.valid);
    assert!(response.dry_run);
    assert!(response.workflow.is_none());

    assert_eq!(store.load_graph(created.rule.id).await.unwrap(), before);
    assert_eq!(store.list_rules().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rejected_save_leaves_store_untouched() {
    let (store, _, orchestrator) = services();
    let created = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();
    let before = store.load_graph(created.rule.id).await.unwrap();

    let mut broken = two_step_request("crm.contacts");
    broken.edges.push(EdgeInput::link("notify", "stamp", None));
    let response = orchestrator
        .save(Some(created.rule.id), broken, false, None)
        .await
        .unwrap();
    assert!(!response.valid);
    assert!(response.errors.iter().any(|e| e.code == codes::CYCLE_DETECTED));

    assert_eq!(store.load_graph(created.rule.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_duplicate_then_delete_copy() {
    let (store, _, orchestrator) = services();
    let original = orchestrator
        .save(None, random_dag(), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();

    let copy = orchestrator.duplicate(original.rule.id, None).await.unwrap();
    assert_persisted_invariants(&copy);
    assert_eq!(copy.actions.len(), original.actions.len());
    assert_eq!(copy.edges.len(), original.edges.len());
    assert!(!copy.rule.is_active);

    let original_ids: HashSet<Uuid> = original.actions.iter().map(|a| a.id).collect();
    assert!(copy.actions.iter().all(|a| !original_ids.contains(&a.id)));

    orchestrator.delete_rule(copy.rule.id).await.unwrap();
    let survivor = store.load_graph(original.rule.id).await.unwrap().unwrap();
    assert_eq!(survivor.actions.len(), original.actions.len());
    assert_eq!(survivor.edges.len(), original.edges.len());
}

#[tokio::test]
async fn test_concurrent_saves_with_same_version_have_one_winner() {
    let (store, _, orchestrator) = services();
    let created = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();

    let saves = (0..4).map(|_| {
        let mut request = random_dag();
        request.expected_version = Some(1);
        orchestrator.save(Some(created.rule.id), request, false, None)
    });
    let results = join_all(saves).await;

    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        let err = assert_err!(result);
        assert!(matches!(err, WorkflowError::Store(StoreError::VersionConflict { .. })));
    }

    let graph = assert_ok!(store.load_graph(created.rule.id).await).unwrap();
    assert_eq!(graph.rule.version, 2);
    assert_persisted_invariants(&graph);
}
