//! Action type registry
//!
//! Maps an `action_type` tag to the handler that validates and runs it. The
//! registry is assembled once at startup and shared read-only through
//! `Arc<ActionRegistry>`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{StoreError, WorkflowStore};

use super::actions::{
    ConditionAction, CreateNotificationAction, SendWebhookAction, SetVariableAction, WaitAction,
};
use super::conditions::lookup_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs inline, bounded by the sync timeout
    Sync,
    /// Runs detached; manual callers poll the execution record
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

impl ConfigField {
    pub const fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self { name, kind, required: true, description }
    }

    pub const fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self { name, kind, required: false, description }
    }
}

/// A problem with one field of an action's config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Static description of an action type, as shown to editors and tool callers
#[derive(Debug, Clone, Serialize)]
pub struct ActionTypeDescriptor {
    pub tag: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub ports: &'static [&'static str],
    pub default_port: &'static str,
    /// Whether callers may execute the type outside a rule
    pub manual: bool,
    pub mode: ExecutionMode,
    pub config_schema: Vec<ConfigField>,
}

impl ActionTypeDescriptor {
    pub fn declares_port(&self, port: &str) -> bool {
        self.ports.contains(&port)
    }

    /// Check a config object against the declared schema. A null config is
    /// treated as an empty object.
    pub fn check_schema(&self, config: &Value) -> Vec<FieldIssue> {
        let empty = Map::new();
        let object = match config {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return vec![FieldIssue::new("", "config must be a JSON object")],
        };

        let mut issues = Vec::new();
        for field in &self.config_schema {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    issues.push(FieldIssue::new(field.name, "is required"));
                }
                Some(value) if !value.is_null() && !field.kind.matches(value) => {
                    issues.push(FieldIssue::new(
                        field.name,
                        format!("must be of type {}", field.kind.as_str()),
                    ));
                }
                _ => {}
            }
        }
        issues
    }
}

/// Port and output chosen by a handler
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub port: String,
    pub output: Value,
    /// Run variables to set for downstream actions
    pub variables: Map<String, Value>,
}

impl ActionOutcome {
    pub fn on(port: &str, output: Value) -> Self {
        Self { port: port.to_string(), output, variables: Map::new() }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Rebuild an outcome from the `result` column of a succeeded execution
    pub fn from_record(result: &Value) -> Option<Self> {
        Some(Self {
            port: result.get("port")?.as_str()?.to_string(),
            output: result.get("output").cloned().unwrap_or(Value::Null),
            variables: result
                .get("variables")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

/// What a handler can see while executing
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub requested_by: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub action_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    /// Serialized entity carried by the triggering event, or the manual request payload
    pub payload: Value,
    pub variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn manual(requested_by: Uuid, payload: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            requested_by: Some(requested_by),
            payload,
            ..Default::default()
        }
    }

    /// Resolve a path against the payload first, then the run variables
    pub fn lookup(&self, path: &str) -> Option<Value> {
        if let Some(v) = lookup_path(&self.payload, path) {
            return Some(v.clone());
        }
        if let Some(v) = self.variables.get(path) {
            return Some(v.clone());
        }
        let (head, rest) = path.split_once('.')?;
        self.variables
            .get(head)
            .and_then(|v| lookup_path(v, rest))
            .cloned()
    }

    /// Document conditions are evaluated against: run variables overlaid by the payload
    pub fn scope(&self) -> Value {
        let mut scope: Map<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match &self.payload {
            Value::Object(map) => {
                for (k, v) in map {
                    scope.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            other => {
                scope.insert("payload".to_string(), other.clone());
            }
        }
        Value::Object(scope)
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn descriptor(&self) -> &ActionTypeDescriptor;

    /// Schema check plus any type-specific rules
    fn validate_config(&self, config: &Value) -> Vec<FieldIssue> {
        self.descriptor().check_schema(config)
    }

    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("action type '{0}' registered twice")]
    DuplicateTag(String),
}

#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: BTreeMap<&'static str, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action type
    pub fn builtin(
        store: Arc<dyn WorkflowStore>,
        http: reqwest::Client,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(ConditionAction::new()))?;
        registry.register(Arc::new(SendWebhookAction::new(http)))?;
        registry.register(Arc::new(CreateNotificationAction::new(store)))?;
        registry.register(Arc::new(SetVariableAction::new()))?;
        registry.register(Arc::new(WaitAction::new()))?;
        Ok(registry)
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) -> Result<(), RegistryError> {
        let tag = handler.descriptor().tag;
        if self.handlers.contains_key(tag) {
            return Err(RegistryError::DuplicateTag(tag.to_string()));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(tag)
    }

    pub fn descriptor(&self, tag: &str) -> Option<&ActionTypeDescriptor> {
        self.handlers.get(tag).map(|h| h.descriptor())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Descriptors ordered by tag
    pub fn descriptors(&self) -> impl Iterator<Item = &ActionTypeDescriptor> {
        self.handlers.values().map(|h| h.descriptor())
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }
}
