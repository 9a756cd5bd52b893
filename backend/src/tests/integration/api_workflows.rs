// Integration tests for the full-graph workflow endpoints

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::HashSet;
use uuid::Uuid;

use crate::auth::rbac::{TableOp, WorkflowTable};
use crate::tests::fixtures::two_step_workflow;
use crate::tests::helpers::send;
use crate::tests::TestContext;

async fn create(ctx: &TestContext, body: Value) -> Value {
    let token = ctx.admin_token();
    let (status, created) = send(
        ctx.router(),
        Method::POST,
        "/workflow/rules/full",
        Some(&token),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    created["workflow"].clone()
}

fn ids(items: &Value) -> HashSet<String> {
    items
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

/// (source type, target type, port) triples, independent of IDs
fn topology(graph: &Value) -> Vec<(Option<String>, String, Option<String>)> {
    let type_of = |id: &Value| -> Option<String> {
        graph["actions"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| &a["id"] == id)
            .map(|a| a["action_type"].as_str().unwrap().to_string())
    };
    let mut edges: Vec<_> = graph["edges"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| {
            (
                type_of(&e["source_action_id"]),
                type_of(&e["target_action_id"]).unwrap(),
                e["source_output_port"].as_str().map(str::to_string),
            )
        })
        .collect();
    edges.sort();
    edges
}

#[tokio::test]
async fn test_create_two_step_workflow() {
    let ctx = TestContext::new().await;
    let workflow = create(&ctx, two_step_workflow("crm.contacts")).await;
    let rule_id = workflow["rule"]["id"].as_str().unwrap();
    assert_eq!(workflow["rule"]["version"], 1);

    let (status, fetched) = send(
        ctx.router(),
        Method::GET,
        &format!("/workflow/rules/{}/full", rule_id),
        Some(&ctx.admin_token()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["actions"].as_array().unwrap().len(), 2);
    assert_eq!(fetched["edges"].as_array().unwrap().len(), 2);

    let edges = fetched["edges"].as_array().unwrap();
    let starts: Vec<_> = edges.iter().filter(|e| e["source_action_id"].is_null()).collect();
    assert_eq!(starts.len(), 1);
    assert!(starts[0]["source_output_port"].is_null());

    // Missing port resolved to the source type's default
    let link = edges.iter().find(|e| !e["source_action_id"].is_null()).unwrap();
    assert_eq!(link["source_output_port"], "success");

    // Every edge points at an action of the same rule
    let action_ids = ids(&fetched["actions"]);
    for edge in edges {
        assert_eq!(edge["rule_id"], fetched["rule"]["id"]);
        assert!(action_ids.contains(edge["target_action_id"].as_str().unwrap()));
    }
}

#[tokio::test]
async fn test_dry_run_never_writes() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();

    let (status, body) = send(
        ctx.router(),
        Method::POST,
        "/workflow/rules/full?dry_run=true",
        Some(&token),
        Some(two_step_workflow("crm.contacts")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["dry_run"], true);
    assert!(body.get("workflow").is_none());

    let (_, rules) = send(ctx.router(), Method::GET, "/workflow/rules", Some(&token), None).await;
    assert_eq!(rules, json!([]));

    // Dry-run replace leaves the persisted graph as it was
    let workflow = create(&ctx, two_step_workflow("crm.contacts")).await;
    let uri = format!("/workflow/rules/{}/full", workflow["rule"]["id"].as_str().unwrap());
    let (_, before) = send(ctx.router(), Method::GET, &uri, Some(&token), None).await;

    let mut changed = two_step_workflow("crm.contacts");
    changed["actions"].as_array_mut().unwrap().pop();
    changed["edges"].as_array_mut().unwrap().pop();
    let (status, body) = send(
        ctx.router(),
        Method::PUT,
        &format!("{}?dry_run=true", uri),
        Some(&token),
        Some(changed),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (_, after) = send(ctx.router(), Method::GET, &uri, Some(&token), None).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_undeclared_port_is_reported_not_raised() {
    let ctx = TestContext::new().await;
    let mut body = two_step_workflow("crm.contacts");
    body["edges"][1]["source_output_port"] = json!("maybe");

    let (status, result) = send(
        ctx.router(),
        Method::POST,
        "/workflow/rules/full",
        Some(&ctx.admin_token()),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["valid"], false);

    let issue = result["errors"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["code"] == "invalid_output_port")
        .expect("port error");
    assert!(issue["message"].as_str().unwrap().contains("stamp-to-notify"));
    assert!(issue["message"].as_str().unwrap().contains("maybe"));
}

#[tokio::test]
async fn test_multiple_start_edges_are_listed() {
    let ctx = TestContext::new().await;
    let mut body = two_step_workflow("crm.contacts");
    body["edges"][1] = json!({"key": "second-start", "target_key": "notify"});

    let (status, result) = send(
        ctx.router(),
        Method::POST,
        "/workflow/rules/full",
        Some(&ctx.admin_token()),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let issue = result["errors"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["code"] == "multiple_start_edges")
        .expect("start edge error");
    let message = issue["message"].as_str().unwrap();
    assert!(message.contains("start"));
    assert!(message.contains("second-start"));
}

#[tokio::test]
async fn test_identical_saves_are_idempotent() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let body = two_step_workflow("crm.contacts");
    let workflow = create(&ctx, body.clone()).await;
    let uri = format!("/workflow/rules/{}/full", workflow["rule"]["id"].as_str().unwrap());

    let (status, first) = send(ctx.router(), Method::PUT, &uri, Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = send(ctx.router(), Method::PUT, &uri, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    let first = &first["workflow"];
    let second = &second["workflow"];
    assert_eq!(topology(first), topology(second));
    assert_eq!(topology(first), topology(&workflow));
    assert!(ids(&first["actions"]).is_disjoint(&ids(&second["actions"])));
    assert_eq!(second["rule"]["version"], 3);
}

#[tokio::test]
async fn test_stale_version_conflicts() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let workflow = create(&ctx, two_step_workflow("crm.contacts")).await;
    let uri = format!("/workflow/rules/{}/full", workflow["rule"]["id"].as_str().unwrap());

    let mut body = two_step_workflow("crm.contacts");
    body["expected_version"] = json!(1);
    let (status, _) = send(ctx.router(), Method::PUT, &uri, Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);

    // A second editor still holding version 1 loses
    let (status, error) = send(ctx.router(), Method::PUT, &uri, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "CONFLICT");
}

#[tokio::test]
async fn test_duplicate_is_independent_copy() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let original = create(&ctx, two_step_workflow("crm.contacts")).await;
    let original_id = original["rule"]["id"].as_str().unwrap();

    let (status, copy) = send(
        ctx.router(),
        Method::POST,
        &format!("/workflow/rules/{}/duplicate", original_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(copy["rule"]["is_active"], false);
    assert!(copy["rule"]["name"].as_str().unwrap().ends_with("(copy)"));
    assert_eq!(topology(&copy), topology(&original));
    assert!(ids(&copy["actions"]).is_disjoint(&ids(&original["actions"])));
    assert!(ids(&copy["edges"]).is_disjoint(&ids(&original["edges"])));

    let (status, _) = send(
        ctx.router(),
        Method::DELETE,
        &format!("/workflow/rules/{}", copy["rule"]["id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, still_there) = send(
        ctx.router(),
        Method::GET,
        &format!("/workflow/rules/{}/full", original_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(topology(&still_there), topology(&original));
}

#[tokio::test]
async fn test_preview_reports_diff_without_writing() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let workflow = create(&ctx, two_step_workflow("crm.contacts")).await;
    let rule_id = workflow["rule"]["id"].as_str().unwrap();

    let mut proposed = two_step_workflow("crm.contacts");
    proposed["name"] = json!("Renamed");
    let (status, preview) = send(
        ctx.router(),
        Method::POST,
        &format!("/workflow/rules/{}/preview", rule_id),
        Some(&token),
        Some(proposed),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["validation"]["valid"], true);
    assert_eq!(preview["diff"]["rule_changes"][0]["field"], "name");

    let (_, fetched) = send(
        ctx.router(),
        Method::GET,
        &format!("/workflow/rules/{}/full", rule_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(fetched["rule"]["name"], workflow["rule"]["name"]);
}

#[tokio::test]
async fn test_missing_rule_is_not_found() {
    let ctx = TestContext::new().await;
    let (status, error) = send(
        ctx.router(),
        Method::GET,
        &format!("/workflow/rules/{}/full", Uuid::new_v4()),
        Some(&ctx.admin_token()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_table_permissions_gate_writes() {
    let ctx = TestContext::new().await;
    let viewer = Uuid::new_v4();
    ctx.store
        .grant_table(viewer, WorkflowTable::AutomationRules, &[TableOp::Read])
        .await;
    let token = ctx.token_for(vec![viewer]);

    let (status, _) = send(ctx.router(), Method::GET, "/workflow/rules", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, error) = send(
        ctx.router(),
        Method::POST,
        "/workflow/rules/full",
        Some(&token),
        Some(two_step_workflow("crm.contacts")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "INSUFFICIENT_PERMISSIONS");
    assert_eq!(error["details"]["required"][0], "automation_rules:create");

    let (status, _) = send(ctx.router(), Method::GET, "/workflow/rules", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
