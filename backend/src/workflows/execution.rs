//! Action execution service
//!
//! Runs a single action, either because a caller asked for it or as one step
//! of a triggered rule, and keeps its `ActionExecution` record current:
//! pending, running, then succeeded or failed.

use chrono::Utc;
use ruleflow_shared::{ActionExecution, ExecutionStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::render_config;
use super::registry::{
    ActionHandler, ActionOutcome, ActionRegistry, ActionTypeDescriptor, ExecutionContext,
    ExecutionMode, HandlerError,
};
use super::{WorkflowError, WorkflowResult};
use crate::auth::CallerIdentity;
use crate::config::ExecutionConfig;
use crate::store::{ExecutionUpdate, StoreError, WorkflowStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub config: Value,
    /// Data the action's templates and conditions read from
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ExecuteResponse {
    fn accepted(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Pending,
            port: None,
            output: None,
        }
    }

    fn completed(execution_id: Uuid, outcome: ActionOutcome) -> Self {
        Self {
            execution_id,
            status: ExecutionStatus::Succeeded,
            port: Some(outcome.port),
            output: Some(outcome.output),
        }
    }
}

#[derive(Clone)]
pub struct ExecutionService {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<ActionRegistry>,
    sync_timeout: Duration,
    step_timeout: Duration,
}

impl ExecutionService {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<ActionRegistry>,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            sync_timeout: config.sync_timeout(),
            step_timeout: config.step_timeout(),
        }
    }

    /// Manually triggerable types that at least one of the caller's roles may run
    pub async fn list_available(
        &self,
        caller: &CallerIdentity,
    ) -> WorkflowResult<Vec<ActionTypeDescriptor>> {
        if caller.role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let permissions = self.store.action_permissions(&caller.role_ids).await?;
        let allowed: HashSet<&str> = permissions
            .iter()
            .filter(|p| p.allowed)
            .map(|p| p.action_type.as_str())
            .collect();

        Ok(self
            .registry
            .descriptors()
            .filter(|d| d.manual && allowed.contains(d.tag))
            .cloned()
            .collect())
    }

    pub async fn execute(
        &self,
        action_type: &str,
        request: ExecuteRequest,
        caller: &CallerIdentity,
    ) -> WorkflowResult<ExecuteResponse> {
        let handler = self.registry.get(action_type).cloned().ok_or_else(|| {
            WorkflowError::InvalidArgument(format!("unknown action type '{}'", action_type))
        })?;

        if !self.store.is_action_allowed(&caller.role_ids, action_type).await? {
            warn!(user_id = %caller.user_id, action_type, "action execution denied");
            return Err(WorkflowError::PermissionDenied {
                action_type: action_type.to_string(),
            });
        }

        let descriptor = handler.descriptor();
        if !descriptor.manual {
            return Err(WorkflowError::FailedPrecondition(format!(
                "action type '{}' only runs inside a rule",
                action_type
            )));
        }

        let issues = handler.validate_config(&request.config);
        if !issues.is_empty() {
            let detail: Vec<String> = issues
                .iter()
                .map(|i| format!("{}: {}", i.field, i.message))
                .collect();
            return Err(WorkflowError::InvalidArgument(format!(
                "invalid config for '{}': {}",
                action_type,
                detail.join("; ")
            )));
        }

        let ctx = ExecutionContext::manual(caller.user_id, request.payload.unwrap_or(Value::Null));
        let config = render_config(&request.config, &ctx);
        let execution_id = ctx.execution_id;
        self.record_pending(action_type, &ctx).await?;
        info!(%execution_id, action_type, user_id = %caller.user_id, "manual execution started");

        match descriptor.mode {
            ExecutionMode::Sync => {
                // Runs in its own task so the record settles even if the caller goes away
                let service = self.clone();
                let limit = self.sync_timeout;
                let task = tokio::spawn(async move { service.drive(handler, config, ctx, limit).await });
                match task.await {
                    Ok(Ok(outcome)) => Ok(ExecuteResponse::completed(execution_id, outcome)),
                    Ok(Err(err)) => Err(WorkflowError::ActionFailed {
                        execution_id,
                        message: err.to_string(),
                    }),
                    Err(join) => Err(WorkflowError::ActionFailed {
                        execution_id,
                        message: join.to_string(),
                    }),
                }
            }
            ExecutionMode::Async => {
                let service = self.clone();
                let limit = self.step_timeout;
                tokio::spawn(async move {
                    // Outcome lands on the execution record
                    let _ = service.drive(handler, config, ctx, limit).await;
                });
                Ok(ExecuteResponse::accepted(execution_id))
            }
        }
    }

    pub async fn get_execution_status(&self, execution_id: Uuid) -> WorkflowResult<ActionExecution> {
        self.store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("Execution {}", execution_id)))
    }

    /// Outcomes of the steps an earlier attempt of this run already
    /// completed, keyed by action ID
    pub(crate) async fn succeeded_steps(
        &self,
        event_id: Uuid,
        rule_id: Uuid,
    ) -> Result<HashMap<Uuid, (Uuid, ActionOutcome)>, StoreError> {
        let records = self.store.succeeded_steps(event_id, rule_id).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let action_id = record.action_id?;
                let outcome = ActionOutcome::from_record(record.result.as_ref()?)?;
                Some((action_id, (record.id, outcome)))
            })
            .collect())
    }

    /// Run one step of a rule graph, recorded like any other execution
    pub(crate) async fn run_step(
        &self,
        handler: Arc<dyn ActionHandler>,
        config: Value,
        ctx: ExecutionContext,
    ) -> Result<ActionOutcome, HandlerError> {
        let descriptor = handler.descriptor();
        self.record_pending(descriptor.tag, &ctx).await?;
        let timeout = match descriptor.mode {
            ExecutionMode::Sync => self.sync_timeout,
            ExecutionMode::Async => self.step_timeout,
        };
        self.drive(handler, config, ctx, timeout).await
    }

    async fn record_pending(
        &self,
        action_type: &str,
        ctx: &ExecutionContext,
    ) -> Result<(), StoreError> {
        self.store
            .insert_execution(ActionExecution {
                id: ctx.execution_id,
                action_type: action_type.to_string(),
                status: ExecutionStatus::Pending,
                requested_by: ctx.requested_by,
                rule_id: ctx.rule_id,
                action_id: ctx.action_id,
                event_id: ctx.event_id,
                started_at: None,
                completed_at: None,
                result: None,
                error: None,
                created_at: Utc::now(),
            })
            .await
    }

    async fn drive(
        &self,
        handler: Arc<dyn ActionHandler>,
        config: Value,
        ctx: ExecutionContext,
        limit: Duration,
    ) -> Result<ActionOutcome, HandlerError> {
        let execution_id = ctx.execution_id;
        if let Err(e) = self.store.update_execution(execution_id, ExecutionUpdate::running()).await {
            warn!(%execution_id, error = %e, "could not mark execution running");
        }

        let result = tokio::time::timeout(limit, handler.execute(&config, &ctx))
            .await
            .unwrap_or(Err(HandlerError::Timeout(limit)));

        let update = match &result {
            Ok(outcome) => ExecutionUpdate::succeeded(json!({
                "port": outcome.port,
                "output": outcome.output,
                "variables": outcome.variables,
            })),
            Err(err) => {
                warn!(%execution_id, action_type = handler.descriptor().tag, error = %err, "execution failed");
                ExecutionUpdate::failed(err.to_string())
            }
        };
        if let Err(e) = self.store.update_execution(execution_id, update).await {
            error!(%execution_id, error = %e, "could not record execution outcome");
        }

        result
    }
}
