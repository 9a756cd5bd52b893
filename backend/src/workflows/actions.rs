// Workflow Actions - built-in action types

use async_trait::async_trait;
use chrono::Utc;
use ruleflow_shared::WorkflowNotification;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::conditions::ConditionGroup;
use super::registry::{
    ActionHandler, ActionOutcome, ActionTypeDescriptor, ConfigField, ExecutionContext,
    ExecutionMode, FieldIssue, FieldKind, HandlerError,
};
use crate::store::WorkflowStore;

pub const PORT_SUCCESS: &str = "success";
pub const PORT_FAILURE: &str = "failure";

/// Longest pause a `wait` action may request
pub const MAX_WAIT_SECS: u64 = 3600;

const WEBHOOK_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];
const NOTIFICATION_LEVELS: [&str; 4] = ["info", "success", "warning", "error"];

// ===== condition =====

/// Branches on a condition group evaluated over the event payload and run variables
pub struct ConditionAction {
    descriptor: ActionTypeDescriptor,
}

impl ConditionAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionTypeDescriptor {
                tag: "condition",
                display_name: "Condition",
                description: "Route to the true or false port depending on field conditions",
                ports: &["true", "false"],
                default_port: "true",
                manual: false,
                mode: ExecutionMode::Sync,
                config_schema: vec![
                    ConfigField::optional("logic", FieldKind::String, "\"and\" or \"or\""),
                    ConfigField::optional("conditions", FieldKind::Array, "Field conditions"),
                    ConfigField::optional("groups", FieldKind::Array, "Nested condition groups"),
                ],
            },
        }
    }

    fn parse(config: &Value) -> Result<ConditionGroup, String> {
        if config.is_null() {
            return Ok(ConditionGroup::default());
        }
        serde_json::from_value(config.clone()).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ActionHandler for ConditionAction {
    fn descriptor(&self) -> &ActionTypeDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldIssue> {
        let mut issues = self.descriptor.check_schema(config);
        if !issues.is_empty() {
            return issues;
        }
        match Self::parse(config) {
            Ok(group) => issues.extend(
                group
                    .problems("")
                    .into_iter()
                    .map(|(field, message)| FieldIssue::new(field, message)),
            ),
            Err(e) => issues.push(FieldIssue::new("", e)),
        }
        issues
    }

    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError> {
        let group = Self::parse(config).map_err(HandlerError::InvalidConfig)?;
        let result = group.evaluate(&ctx.scope());
        debug!(result, "condition evaluated");

        let port = if result { "true" } else { "false" };
        Ok(ActionOutcome::on(port, json!({ "result": result })))
    }
}

// ===== send_webhook =====

/// Calls an external HTTP endpoint; non-2xx answers leave through the failure port
pub struct SendWebhookAction {
    descriptor: ActionTypeDescriptor,
    client: reqwest::Client,
}

impl SendWebhookAction {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            descriptor: ActionTypeDescriptor {
                tag: "send_webhook",
                display_name: "Send webhook",
                description: "Send an HTTP request to an external endpoint",
                ports: &[PORT_SUCCESS, PORT_FAILURE],
                default_port: PORT_SUCCESS,
                manual: true,
                mode: ExecutionMode::Async,
                config_schema: vec![
                    ConfigField::required("url", FieldKind::String, "Target URL"),
                    ConfigField::optional("method", FieldKind::String, "HTTP method, default POST"),
                    ConfigField::optional("headers", FieldKind::Object, "Extra request headers"),
                    ConfigField::optional("body", FieldKind::Any, "JSON body; defaults to the payload"),
                    ConfigField::optional("timeout_secs", FieldKind::Number, "Request timeout"),
                ],
            },
            client,
        }
    }
}

#[async_trait]
impl ActionHandler for SendWebhookAction {
    fn descriptor(&self) -> &ActionTypeDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldIssue> {
        let mut issues = self.descriptor.check_schema(config);
        if let Some(url) = config.get("url").and_then(Value::as_str) {
            // Templated URLs are resolved at run time
            if !url.contains("{{") && !(url.starts_with("http://") || url.starts_with("https://")) {
                issues.push(FieldIssue::new("url", "must be an http(s) URL"));
            }
        }
        if let Some(method) = config.get("method").and_then(Value::as_str) {
            if !WEBHOOK_METHODS.contains(&method.to_uppercase().as_str()) {
                issues.push(FieldIssue::new("method", format!("unsupported method {}", method)));
            }
        }
        issues
    }

    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError> {
        let url = config["url"]
            .as_str()
            .ok_or_else(|| HandlerError::InvalidConfig("missing url".to_string()))?;
        let method = config["method"].as_str().unwrap_or("POST").to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(HandlerError::InvalidConfig(format!("unsupported method {}", other)))
            }
        };

        if let Some(headers) = config["headers"].as_object() {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }
        if let Some(secs) = config["timeout_secs"].as_u64() {
            request = request.timeout(Duration::from_secs(secs));
        }
        if method != "GET" {
            let body = match &config["body"] {
                Value::Null => &ctx.payload,
                body => body,
            };
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        info!(url, status = status.as_u16(), "webhook delivered");

        let output = json!({
            "url": url,
            "status_code": status.as_u16(),
            "response_body": body,
        });
        let port = if status.is_success() { PORT_SUCCESS } else { PORT_FAILURE };
        Ok(ActionOutcome::on(port, output))
    }
}

// ===== create_notification =====

/// Stores an in-app notification for a user
pub struct CreateNotificationAction {
    descriptor: ActionTypeDescriptor,
    store: Arc<dyn WorkflowStore>,
}

impl CreateNotificationAction {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            descriptor: ActionTypeDescriptor {
                tag: "create_notification",
                display_name: "Create notification",
                description: "Store an in-app notification",
                ports: &[PORT_SUCCESS],
                default_port: PORT_SUCCESS,
                manual: true,
                mode: ExecutionMode::Sync,
                config_schema: vec![
                    ConfigField::required("title", FieldKind::String, "Notification title"),
                    ConfigField::required("message", FieldKind::String, "Notification body"),
                    ConfigField::optional("level", FieldKind::String, "info, success, warning or error"),
                    ConfigField::optional("user_id", FieldKind::String, "Recipient; defaults to the payload's assigned_to"),
                ],
            },
            store,
        }
    }
}

#[async_trait]
impl ActionHandler for CreateNotificationAction {
    fn descriptor(&self) -> &ActionTypeDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldIssue> {
        let mut issues = self.descriptor.check_schema(config);
        if let Some(level) = config.get("level").and_then(Value::as_str) {
            if !NOTIFICATION_LEVELS.contains(&level) {
                issues.push(FieldIssue::new("level", format!("unknown level {}", level)));
            }
        }
        issues
    }

    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError> {
        let title = config["title"]
            .as_str()
            .ok_or_else(|| HandlerError::InvalidConfig("missing title".to_string()))?;
        let message = config["message"]
            .as_str()
            .ok_or_else(|| HandlerError::InvalidConfig("missing message".to_string()))?;
        let level = config["level"].as_str().unwrap_or("info");

        let user_id = match config["user_id"].as_str() {
            Some(raw) => Some(
                raw.parse::<Uuid>()
                    .map_err(|_| HandlerError::InvalidConfig(format!("bad user_id {}", raw)))?,
            ),
            None => ctx
                .lookup("assigned_to")
                .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
                .or(ctx.requested_by),
        };

        let notification = WorkflowNotification {
            id: Uuid::new_v4(),
            user_id,
            rule_id: ctx.rule_id,
            title: title.to_string(),
            message: message.to_string(),
            level: level.to_string(),
            created_at: Utc::now(),
        };
        let id = notification.id;
        self.store.insert_notification(notification).await?;

        Ok(ActionOutcome::on(
            PORT_SUCCESS,
            json!({ "notification_id": id, "user_id": user_id }),
        ))
    }
}

// ===== set_variable =====

pub struct SetVariableAction {
    descriptor: ActionTypeDescriptor,
}

impl SetVariableAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionTypeDescriptor {
                tag: "set_variable",
                display_name: "Set variable",
                description: "Store a value for later actions in the same run",
                ports: &[PORT_SUCCESS],
                default_port: PORT_SUCCESS,
                manual: false,
                mode: ExecutionMode::Sync,
                config_schema: vec![
                    ConfigField::required("name", FieldKind::String, "Variable name"),
                    ConfigField::required("value", FieldKind::Any, "Value, may use {{templates}}"),
                ],
            },
        }
    }
}

#[async_trait]
impl ActionHandler for SetVariableAction {
    fn descriptor(&self) -> &ActionTypeDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldIssue> {
        let mut issues = self.descriptor.check_schema(config);
        if config.get("name").and_then(Value::as_str).is_some_and(|n| n.trim().is_empty()) {
            issues.push(FieldIssue::new("name", "must not be empty"));
        }
        issues
    }

    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError> {
        let name = config["name"]
            .as_str()
            .ok_or_else(|| HandlerError::InvalidConfig("missing name".to_string()))?;
        let value = config["value"].clone();

        Ok(ActionOutcome::on(PORT_SUCCESS, json!({ "name": name, "value": value }))
            .with_variable(name, value))
    }
}

// ===== wait =====

pub struct WaitAction {
    descriptor: ActionTypeDescriptor,
}

impl WaitAction {
    pub fn new() -> Self {
        Self {
            descriptor: ActionTypeDescriptor {
                tag: "wait",
                display_name: "Wait",
                description: "Pause the run for a number of seconds",
                ports: &[PORT_SUCCESS],
                default_port: PORT_SUCCESS,
                manual: true,
                mode: ExecutionMode::Async,
                config_schema: vec![ConfigField::required(
                    "seconds",
                    FieldKind::Number,
                    "Seconds to wait, at most 3600",
                )],
            },
        }
    }
}

#[async_trait]
impl ActionHandler for WaitAction {
    fn descriptor(&self) -> &ActionTypeDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &Value) -> Vec<FieldIssue> {
        let mut issues = self.descriptor.check_schema(config);
        if let Some(seconds) = config.get("seconds").filter(|v| v.is_number()) {
            match seconds.as_u64() {
                Some(s) if s <= MAX_WAIT_SECS => {}
                _ => issues.push(FieldIssue::new(
                    "seconds",
                    format!("must be a whole number between 0 and {}", MAX_WAIT_SECS),
                )),
            }
        }
        issues
    }

    async fn execute(
        &self,
        config: &Value,
        _ctx: &ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError> {
        let seconds = config["seconds"].as_u64().unwrap_or(0).min(MAX_WAIT_SECS);
        tokio::time::sleep(Duration::from_secs(seconds)).await;

        Ok(ActionOutcome::on(PORT_SUCCESS, json!({ "waited_seconds": seconds })))
    }
}
