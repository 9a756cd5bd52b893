// Workflow Automation Engine
//
// Rules watch an entity for a change kind and run a DAG of actions when a
// matching change event arrives, or when a caller executes an action by hand.

pub mod actions;
pub mod conditions;
pub mod diff;
pub mod dispatcher;
pub mod execution;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod tools;
pub mod validator;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub use conditions::{Condition, ConditionGroup, ConditionOperator, Logic};
pub use dispatcher::{ChangeListener, DispatchOutcome, EventDispatcher};
pub use execution::{ExecuteRequest, ExecuteResponse, ExecutionService};
pub use executor::{GraphRunner, RunError, RunReport};
pub use model::{
    ActionInput, CreateEdgeRequest, EdgeInput, SaveWorkflowRequest, SaveWorkflowResponse,
    ValidationIssue, ValidationResult,
};
pub use orchestrator::SaveOrchestrator;
pub use registry::{
    ActionHandler, ActionOutcome, ActionRegistry, ActionTypeDescriptor, ExecutionContext,
    ExecutionMode, HandlerError,
};
pub use tools::ToolCatalog;

/// Failures surfaced by the engine's services
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("none of the caller's roles may execute '{action_type}'")]
    PermissionDenied { action_type: String },

    #[error("execution {execution_id} failed: {message}")]
    ActionFailed { execution_id: Uuid, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
