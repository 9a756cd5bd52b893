// Database tests for the Postgres store
// Run with: TEST_DATABASE_URL=postgres://... cargo test -- --ignored

use chrono::Utc;
use ruleflow_shared::{ActionEdge, ExecutionStatus};
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{RunClaim, StoreError, WorkflowStore};
use crate::tests::fixtures::two_step_request;
use crate::tests::PgTestContext;
use crate::workflows::{ActionRegistry, SaveOrchestrator, WorkflowError};

async fn orchestrator(ctx: &PgTestContext) -> SaveOrchestrator {
    let store: Arc<dyn WorkflowStore> = ctx.store.clone();
    let registry = ActionRegistry::builtin(store.clone(), reqwest::Client::new()).unwrap();
    SaveOrchestrator::new(store, Arc::new(registry))
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_save_replace_and_conflict() {
    let ctx = PgTestContext::new().await;
    ctx.cleanup().await;
    let orchestrator = orchestrator(&ctx).await;

    let created = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap();
    let graph = created.workflow.unwrap();
    assert_eq!(graph.rule.version, 1);
    assert_eq!(graph.actions.len(), 2);
    assert_eq!(graph.edges.iter().filter(|e| e.is_start()).count(), 1);

    let mut request = two_step_request("crm.contacts");
    request.expected_version = Some(1);
    let replaced = orchestrator
        .save(Some(graph.rule.id), request.clone(), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();
    assert_eq!(replaced.rule.version, 2);
    assert_eq!(replaced.edges.len(), 2);

    let stale = orchestrator.save(Some(graph.rule.id), request, false, None).await;
    assert!(matches!(
        stale,
        Err(WorkflowError::Store(StoreError::VersionConflict { expected: 1, found: 2, .. }))
    ));

    // The losing save left the winner's graph intact
    let current = orchestrator.get_workflow(graph.rule.id).await.unwrap();
    assert_eq!(current.rule.version, 2);
    assert_eq!(current.actions.len(), 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_store_rejects_cross_rule_edge() {
    let ctx = PgTestContext::new().await;
    ctx.cleanup().await;
    let orchestrator = orchestrator(&ctx).await;

    let first = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();
    let second = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();

    let result = ctx
        .store
        .insert_edge(ActionEdge {
            id: Uuid::new_v4(),
            rule_id: first.rule.id,
            source_action_id: Some(first.actions[0].id),
            target_action_id: second.actions[1].id,
            source_output_port: Some("success".to_string()),
            created_at: Utc::now(),
        })
        .await;
    assert!(matches!(result, Err(StoreError::Precondition(_))));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_rule_run_claims_are_idempotent() {
    let ctx = PgTestContext::new().await;
    ctx.cleanup().await;
    let orchestrator = orchestrator(&ctx).await;
    let graph = orchestrator
        .save(None, two_step_request("crm.contacts"), false, None)
        .await
        .unwrap()
        .workflow
        .unwrap();
    let event_id = Uuid::new_v4();

    let first = ctx.store.claim_rule_run(event_id, graph.rule.id).await.unwrap();
    assert_eq!(first, RunClaim::Claimed { attempt: 1 });
    ctx.store
        .finish_rule_run(event_id, graph.rule.id, ExecutionStatus::Failed, Some("boom".to_string()))
        .await
        .unwrap();

    let retry = ctx.store.claim_rule_run(event_id, graph.rule.id).await.unwrap();
    assert_eq!(retry, RunClaim::Claimed { attempt: 2 });
    ctx.store
        .finish_rule_run(event_id, graph.rule.id, ExecutionStatus::Succeeded, None)
        .await
        .unwrap();

    let redelivery = ctx.store.claim_rule_run(event_id, graph.rule.id).await.unwrap();
    assert_eq!(redelivery, RunClaim::AlreadySucceeded);
}
