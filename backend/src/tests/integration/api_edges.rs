// Integration tests for incremental edge CRUD

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tests::fixtures::two_step_workflow;
use crate::tests::helpers::send;
use crate::tests::TestContext;

async fn create(ctx: &TestContext) -> Value {
    let (status, created) = send(
        ctx.router(),
        Method::POST,
        "/workflow/rules/full",
        Some(&ctx.admin_token()),
        Some(two_step_workflow("crm.contacts")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    created["workflow"].clone()
}

fn action_id(graph: &Value, action_type: &str) -> String {
    graph["actions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["action_type"] == action_type)
        .map(|a| a["id"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn test_clear_and_rebuild_edges() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let graph = create(&ctx).await;
    let base = format!("/workflow/rules/{}", graph["rule"]["id"].as_str().unwrap());
    let stamp = action_id(&graph, "set_variable");
    let notify = action_id(&graph, "create_notification");

    let (status, cleared) = send(
        ctx.router(),
        Method::DELETE,
        &format!("{}/edges-all", base),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["deleted"], 2);

    let (status, start) = send(
        ctx.router(),
        Method::POST,
        &format!("{}/edges", base),
        Some(&token),
        Some(json!({"target_action_id": stamp})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(start["source_output_port"].is_null());

    let (status, link) = send(
        ctx.router(),
        Method::POST,
        &format!("{}/edges", base),
        Some(&token),
        Some(json!({"source_action_id": stamp, "target_action_id": notify})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(link["source_output_port"], "success");

    let (status, edges) = send(ctx.router(), Method::GET, &format!("{}/edges", base), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edges.as_array().unwrap().len(), 2);

    let edge_uri = format!("{}/edges/{}", base, link["id"].as_str().unwrap());
    let (status, _) = send(ctx.router(), Method::DELETE, &edge_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(ctx.router(), Method::DELETE, &edge_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_edge_invariants_are_rechecked() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let graph = create(&ctx).await;
    let base = format!("/workflow/rules/{}/edges", graph["rule"]["id"].as_str().unwrap());
    let stamp = action_id(&graph, "set_variable");
    let notify = action_id(&graph, "create_notification");

    let cases = [
        // Second start edge
        json!({"target_action_id": notify}),
        // Back edge closing a cycle
        json!({"source_action_id": notify, "target_action_id": stamp}),
        // Self loop
        json!({"source_action_id": stamp, "target_action_id": stamp}),
        // Port the source type does not declare
        json!({"source_action_id": stamp, "target_action_id": notify, "source_output_port": "maybe"}),
        // Existing edge
        json!({"source_action_id": stamp, "target_action_id": notify}),
    ];
    for body in cases {
        let (status, error) = send(ctx.router(), Method::POST, &base, Some(&token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED, "{} -> {}", body, error);
        assert_eq!(error["code"], "FAILED_PRECONDITION");
    }

    let (status, _) = send(
        ctx.router(),
        Method::POST,
        &base,
        Some(&token),
        Some(json!({"target_action_id": Uuid::new_v4()})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cross_rule_edge_is_rejected() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let first = create(&ctx).await;
    let second = create(&ctx).await;

    let (status, error) = send(
        ctx.router(),
        Method::POST,
        &format!("/workflow/rules/{}/edges", first["rule"]["id"].as_str().unwrap()),
        Some(&token),
        Some(json!({
            "source_action_id": action_id(&first, "set_variable"),
            "target_action_id": action_id(&second, "create_notification"),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(error["code"], "FAILED_PRECONDITION");

    // Neither graph changed
    for graph in [&first, &second] {
        let (_, edges) = send(
            ctx.router(),
            Method::GET,
            &format!("/workflow/rules/{}/edges", graph["rule"]["id"].as_str().unwrap()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(edges.as_array().unwrap().len(), 2);
    }
}
