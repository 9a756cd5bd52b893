// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use ruleflow::config::{DispatchConfig, ExecutionConfig};
use ruleflow::store::{MemoryWorkflowStore, WorkflowStore};
use ruleflow::workflows::{
    ActionHandler, ActionRegistry, EventDispatcher, ExecutionService, GraphRunner,
    SaveOrchestrator, SaveWorkflowRequest,
};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("ruleflow=debug")
            .try_init()
            .ok();
    });
}

/// Dispatcher, orchestrator and store wired together over memory
pub struct Engine {
    pub store: Arc<MemoryWorkflowStore>,
    pub orchestrator: SaveOrchestrator,
    pub dispatcher: EventDispatcher,
}

impl Engine {
    pub fn start(dispatch: DispatchConfig) -> Self {
        Self::with_handlers(dispatch, Vec::new())
    }

    /// Built-in action types plus `extra`
    pub fn with_handlers(dispatch: DispatchConfig, extra: Vec<Arc<dyn ActionHandler>>) -> Self {
        init_test_logging();
        let store = Arc::new(MemoryWorkflowStore::new());
        let shared: Arc<dyn WorkflowStore> = store.clone();
        let mut registry = ActionRegistry::builtin(shared.clone(), reqwest::Client::new())
            .expect("builtin registry");
        for handler in extra {
            registry.register(handler).expect("unique tag");
        }
        let registry = Arc::new(registry);
        let execution = ExecutionConfig::default();
        let executions = ExecutionService::new(shared.clone(), registry.clone(), &execution);
        let runner = Arc::new(GraphRunner::new(registry.clone(), executions, execution.max_steps));

        Self {
            orchestrator: SaveOrchestrator::new(shared.clone(), registry),
            dispatcher: EventDispatcher::start(shared, runner, dispatch),
            store,
        }
    }

    pub async fn save(&self, request: serde_json::Value) -> Uuid {
        let request: SaveWorkflowRequest = serde_json::from_value(request).expect("valid request");
        let response = self
            .orchestrator
            .save(None, request, false, None)
            .await
            .expect("save succeeds");
        assert!(response.valid, "{:?}", response.errors);
        response.workflow.expect("saved graph").rule.id
    }
}

pub fn fast_retries(workers: usize, queue_capacity: usize) -> DispatchConfig {
    DispatchConfig {
        workers,
        queue_capacity,
        max_attempts: 3,
        backoff_base_ms: 5,
    }
}

/// Poll `check` until it yields a value or three seconds pass
pub async fn eventually<T, F, Fut>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..300 {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
