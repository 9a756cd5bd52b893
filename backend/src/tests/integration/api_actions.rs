// Integration tests for manual action execution

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tests::helpers::{eventually, send};
use crate::tests::TestContext;

#[tokio::test]
async fn test_lists_only_manual_allowed_types() {
    let ctx = TestContext::new().await;
    let (status, listed) = send(ctx.router(), Method::GET, "/workflow/actions", Some(&ctx.admin_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    let tags: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["tag"].as_str().unwrap())
        .collect();
    assert_eq!(tags, vec!["create_notification", "send_webhook", "wait"]);

    let limited = Uuid::new_v4();
    ctx.store.grant_action(limited, "wait", true).await;
    ctx.store.grant_action(limited, "send_webhook", false).await;
    let (_, listed) = send(
        ctx.router(),
        Method::GET,
        "/workflow/actions",
        Some(&ctx.token_for(vec![limited])),
        None,
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["tag"], "wait");
}

#[tokio::test]
async fn test_sync_execution_returns_outcome() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let (status, result) = send(
        ctx.router(),
        Method::POST,
        "/workflow/actions/create_notification/execute",
        Some(&token),
        Some(json!({
            "config": {"title": "Heads up", "message": "Ticket {{ticket.number}} is waiting"},
            "payload": {"ticket": {"number": 4411}}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", result);
    assert_eq!(result["status"], "succeeded");
    assert_eq!(result["port"], "success");

    let notifications = ctx.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].message, "Ticket 4411 is waiting");
    assert_eq!(notifications[0].user_id, Some(ctx.admin_id));

    let (status, execution) = send(
        ctx.router(),
        Method::GET,
        &format!("/workflow/executions/{}", result["execution_id"].as_str().unwrap()),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(execution["status"], "succeeded");
    assert_eq!(execution["result"]["port"], "success");
}

#[tokio::test]
async fn test_async_execution_is_polled() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let (status, accepted) = send(
        ctx.router(),
        Method::POST,
        "/workflow/actions/wait/execute",
        Some(&token),
        Some(json!({"config": {"seconds": 0}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["status"], "pending");

    let uri = format!("/workflow/executions/{}", accepted["execution_id"].as_str().unwrap());
    let finished: Option<Value> = eventually(|| {
        let router = ctx.router();
        let uri = uri.clone();
        let token = token.clone();
        async move {
            let (_, execution) = send(router, Method::GET, &uri, Some(&token), None).await;
            (execution["status"] == "succeeded").then_some(execution)
        }
    })
    .await;
    let finished = finished.expect("wait action finished");
    assert_eq!(finished["result"]["output"]["waited_seconds"], 0);
}

#[tokio::test]
async fn test_execution_failures_map_to_statuses() {
    let ctx = TestContext::new().await;
    let token = ctx.admin_token();
    let cases = [
        ("no_such_type", json!({"config": {}}), StatusCode::BAD_REQUEST),
        ("condition", json!({"config": {}}), StatusCode::PRECONDITION_FAILED),
        ("create_notification", json!({"config": {"title": "only a title"}}), StatusCode::BAD_REQUEST),
        ("wait", json!({"config": {"seconds": 7200}}), StatusCode::BAD_REQUEST),
    ];
    for (action_type, body, expected) in cases {
        let (status, error) = send(
            ctx.router(),
            Method::POST,
            &format!("/workflow/actions/{}/execute", action_type),
            Some(&token),
            Some(body),
        )
        .await;
        assert_eq!(status, expected, "{}: {}", action_type, error);
    }
}

#[tokio::test]
async fn test_role_without_grant_cannot_execute() {
    let ctx = TestContext::new().await;
    let role = Uuid::new_v4();
    ctx.store.grant_action(role, "create_notification", false).await;

    let (status, error) = send(
        ctx.router(),
        Method::POST,
        "/workflow/actions/create_notification/execute",
        Some(&ctx.token_for(vec![role])),
        Some(json!({"config": {"title": "t", "message": "m"}})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["details"]["required"][0], "execute:create_notification");
    assert!(ctx.store.notifications().await.is_empty());
}

#[tokio::test]
async fn test_unknown_execution_is_not_found() {
    let ctx = TestContext::new().await;
    let (status, _) = send(
        ctx.router(),
        Method::GET,
        &format!("/workflow/executions/{}", Uuid::new_v4()),
        Some(&ctx.admin_token()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
