use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::Value;
use std::future::Future;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::jwt::create_jwt;

pub const TEST_SECRET: &str = "test_secret_key_for_testing_only";

pub fn create_test_jwt(user_id: Uuid, role_ids: Vec<Uuid>) -> String {
    create_jwt(TEST_SECRET, user_id, role_ids, Duration::hours(1))
        .expect("Failed to create test JWT")
        .token
}

pub fn create_auth_headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).expect("Failed to create auth header"),
    );
    headers
}

/// Send one request through the router and decode the JSON reply (Null when empty)
pub async fn send(
    router: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        for (name, value) in create_auth_headers(token).iter() {
            builder = builder.header(name, value);
        }
    }
    let request = match body {
        Some(json) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = router.oneshot(request).await.expect("Router failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

/// Poll `check` until it yields a value or two seconds pass
pub async fn eventually<T, F, Fut>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..200 {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    None
}
