// Integration tests for the chat tool endpoints

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::auth::rbac::{TableOp, WorkflowTable};
use crate::tests::fixtures::two_step_workflow;
use crate::tests::helpers::send;
use crate::tests::TestContext;

#[tokio::test]
async fn test_tools_are_listed_with_schemas() {
    let ctx = TestContext::new().await;
    let (status, tools) = send(ctx.router(), Method::GET, "/workflow/tools", Some(&ctx.admin_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["discover_action_types", "validate_workflow", "preview_workflow", "create_workflow", "update_workflow"]
    );
    assert_eq!(tools[4]["parameters"]["required"], json!(["workflow", "rule_id"]));
}

#[tokio::test]
async fn test_preview_then_update_through_tools() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();

    let (status, created) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/create_workflow",
        Some(&token),
        Some(json!({"workflow": two_step_workflow("crm.contacts")})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", created);
    let rule_id = created["workflow"]["rule"]["id"].clone();

    let mut proposed = two_step_workflow("crm.contacts");
    proposed["actions"][1]["config"]["title"] = json!("Say hello");
    let (status, preview) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/preview_workflow",
        Some(&token),
        Some(json!({"rule_id": rule_id, "workflow": proposed.clone()})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Keys of a fresh proposal never match persisted IDs, so every action reads as replaced
    assert_eq!(preview["diff"]["added_actions"].as_array().unwrap().len(), 2);
    assert_eq!(preview["diff"]["removed_actions"].as_array().unwrap().len(), 2);

    let (status, updated) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/update_workflow",
        Some(&token),
        Some(json!({"rule_id": rule_id, "workflow": proposed})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["workflow"]["rule"]["version"], 2);
}

#[tokio::test]
async fn test_tool_grants_are_enforced() {
    let ctx = TestContext::new().await;
    let reader = Uuid::new_v4();
    for table in [WorkflowTable::AutomationRules, WorkflowTable::Actions, WorkflowTable::ActionEdges] {
        ctx.store.grant_table(reader, table, &[TableOp::Read]).await;
    }
    let token = ctx.token_for(vec![reader]);

    let (status, checked) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/validate_workflow",
        Some(&token),
        Some(json!({"workflow": two_step_workflow("crm.contacts")})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checked["valid"], true);

    let (status, _) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/create_workflow",
        Some(&token),
        Some(json!({"workflow": two_step_workflow("crm.contacts")})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(ctx.router(), Method::POST, "/workflow/tools/drop_tables", Some(&token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_only_tools_need_rule_read() {
    let ctx = TestContext::new().await;
    let token = ctx.token_for(vec![Uuid::new_v4()]);
    let body = json!({"workflow": two_step_workflow("crm.contacts")});

    let (status, _) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/validate_workflow",
        Some(&token),
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Same answer as the HTTP dry run for the same caller
    let (status, _) = send(ctx.router(), Method::POST, "/workflow/rules/full?dry_run=true", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        ctx.router(),
        Method::POST,
        "/workflow/tools/discover_action_types",
        Some(&token),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
