//! Event dispatcher
//!
//! Business domains hand change events to the dispatcher after their own
//! write has committed. Events go onto a bounded queue drained by a fixed
//! pool of workers; each worker matches the event against active rules and
//! runs every matching rule's graph.
//!
//! Delivery is at-least-once. A rule run is keyed by `(event_id, rule_id)`
//! and skipped once it has succeeded, so redelivering an event is harmless.
//! Failed runs are retried with exponential backoff in their own task and
//! dead-lettered after the last attempt.

use async_trait::async_trait;
use chrono::Utc;
use ruleflow_shared::{ChangeEvent, DeadLetter, ExecutionStatus, TriggerType};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::{GraphRunner, RunError};
use crate::config::DispatchConfig;
use crate::store::{RunClaim, WorkflowStore};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub mod reasons {
    pub const QUEUE_FULL: &str = "queue_full";
    pub const DISPATCHER_CLOSED: &str = "dispatcher_closed";
    pub const MAX_ATTEMPTS: &str = "max_attempts_exceeded";
    pub const INVALID_GRAPH: &str = "invalid_graph";
    pub const STORE_ERROR: &str = "store_error";
}

/// Delegate interface for in-process domains
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_change(&self, event: ChangeEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Queued,
    DeadLettered,
}

/// Delay before retry number `attempt + 1`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

/// Result of one attempt at running a rule for an event
enum Attempt {
    Done,
    Skipped,
    Retry { attempt: u32, error: String },
    Abandon { attempts: u32, reason: &'static str, error: String },
}

struct DispatchWorker {
    store: Arc<dyn WorkflowStore>,
    runner: Arc<GraphRunner>,
    config: DispatchConfig,
}

impl DispatchWorker {
    async fn handle_event(this: &Arc<Self>, event: Arc<ChangeEvent>) {
        let trigger = TriggerType::for_change(event.action);
        let rules = match this.store.active_rules_for(&event.entity, trigger).await {
            Ok(rules) => rules,
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "failed to match rules");
                this.dead_letter(&event, None, reasons::STORE_ERROR, Some(e.to_string()), 0)
                    .await;
                return;
            }
        };
        debug!(
            event_id = %event.event_id,
            entity = %event.entity,
            trigger = trigger.as_str(),
            matched = rules.len(),
            "event matched rules"
        );

        for rule in rules {
            let outcome = this.attempt(&event, rule.id).await;
            Self::settle(this, event.clone(), rule.id, outcome).await;
        }
    }

    /// Follow up on an attempt: dead-letter, or hand retries to their own task
    async fn settle(this: &Arc<Self>, event: Arc<ChangeEvent>, rule_id: Uuid, outcome: Attempt) {
        match outcome {
            Attempt::Done | Attempt::Skipped => {}
            Attempt::Abandon { attempts, reason, error } => {
                this.dead_letter(&event, Some(rule_id), reason, Some(error), attempts)
                    .await;
            }
            Attempt::Retry { attempt, error } => {
                if attempt >= this.config.max_attempts {
                    this.dead_letter(&event, Some(rule_id), reasons::MAX_ATTEMPTS, Some(error), attempt)
                        .await;
                    return;
                }
                let worker = Arc::clone(this);
                tokio::spawn(async move {
                    worker.retry_loop(event, rule_id, attempt).await;
                });
            }
        }
    }

    async fn retry_loop(&self, event: Arc<ChangeEvent>, rule_id: Uuid, mut last_attempt: u32) {
        loop {
            let delay = backoff_delay(self.config.backoff_base(), last_attempt);
            debug!(event_id = %event.event_id, %rule_id, ?delay, "retrying rule run");
            tokio::time::sleep(delay).await;

            match self.attempt(&event, rule_id).await {
                Attempt::Done | Attempt::Skipped => return,
                Attempt::Abandon { attempts, reason, error } => {
                    self.dead_letter(&event, Some(rule_id), reason, Some(error), attempts)
                        .await;
                    return;
                }
                Attempt::Retry { attempt, error } => {
                    if attempt >= self.config.max_attempts {
                        self.dead_letter(&event, Some(rule_id), reasons::MAX_ATTEMPTS, Some(error), attempt)
                            .await;
                        return;
                    }
                    last_attempt = attempt;
                }
            }
        }
    }

    async fn attempt(&self, event: &ChangeEvent, rule_id: Uuid) -> Attempt {
        let attempt = match self.store.claim_rule_run(event.event_id, rule_id).await {
            Ok(RunClaim::AlreadySucceeded) => {
                debug!(event_id = %event.event_id, %rule_id, "rule run already succeeded");
                return Attempt::Skipped;
            }
            Ok(RunClaim::Claimed { attempt }) => attempt.max(1) as u32,
            Err(e) => {
                return Attempt::Abandon {
                    attempts: 0,
                    reason: reasons::STORE_ERROR,
                    error: e.to_string(),
                }
            }
        };

        let graph = match self.store.load_graph(rule_id).await {
            Ok(Some(graph)) if graph.rule.is_active => graph,
            Ok(_) => {
                // Deleted or deactivated since matching
                self.finish(event, rule_id, ExecutionStatus::Succeeded, None).await;
                return Attempt::Skipped;
            }
            Err(e) => {
                let error = e.to_string();
                self.finish(event, rule_id, ExecutionStatus::Failed, Some(error.clone())).await;
                return Attempt::Retry { attempt, error };
            }
        };

        match self.runner.run(&graph, event).await {
            Ok(report) => {
                self.finish(event, rule_id, ExecutionStatus::Succeeded, None).await;
                info!(
                    event_id = %event.event_id,
                    %rule_id,
                    attempt,
                    steps = report.steps.len(),
                    "rule run succeeded"
                );
                Attempt::Done
            }
            Err(err) => {
                let error = err.to_string();
                self.finish(event, rule_id, ExecutionStatus::Failed, Some(error.clone())).await;
                warn!(event_id = %event.event_id, %rule_id, attempt, error = %error, "rule run failed");
                if err.is_retryable() {
                    Attempt::Retry { attempt, error }
                } else {
                    Attempt::Abandon {
                        attempts: attempt,
                        reason: abandon_reason(&err),
                        error,
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        event: &ChangeEvent,
        rule_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
    ) {
        if let Err(e) = self
            .store
            .finish_rule_run(event.event_id, rule_id, status, error)
            .await
        {
            error!(event_id = %event.event_id, %rule_id, error = %e, "failed to record rule run");
        }
    }

    async fn dead_letter(
        &self,
        event: &ChangeEvent,
        rule_id: Option<Uuid>,
        reason: &str,
        error: Option<String>,
        attempts: u32,
    ) {
        write_dead_letter(self.store.as_ref(), event, rule_id, reason, error, attempts).await;
    }
}

fn abandon_reason(err: &RunError) -> &'static str {
    match err {
        RunError::InvalidGraph(_) | RunError::StepLimit(_) => reasons::INVALID_GRAPH,
        RunError::ActionFailed { .. } => reasons::MAX_ATTEMPTS,
        RunError::Store(_) => reasons::STORE_ERROR,
    }
}

async fn write_dead_letter(
    store: &dyn WorkflowStore,
    event: &ChangeEvent,
    rule_id: Option<Uuid>,
    reason: &str,
    error: Option<String>,
    attempts: u32,
) {
    warn!(event_id = %event.event_id, rule_id = ?rule_id, reason, "dead-lettering");
    let payload = serde_json::to_value(event).unwrap_or_default();
    let letter = DeadLetter {
        id: Uuid::new_v4(),
        event_id: event.event_id,
        rule_id,
        reason: reason.to_string(),
        error,
        attempts: attempts as i32,
        payload,
        created_at: Utc::now(),
    };
    if let Err(e) = store.insert_dead_letter(letter).await {
        error!(event_id = %event.event_id, error = %e, "failed to write dead letter");
    }
}

/// Front door of the worker pool
pub struct EventDispatcher {
    sender: mpsc::Sender<ChangeEvent>,
    store: Arc<dyn WorkflowStore>,
    workers: Vec<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn WorkflowStore>,
        runner: Arc<GraphRunner>,
        config: DispatchConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_count = config.workers.max(1);
        let shared = Arc::new(DispatchWorker {
            store: store.clone(),
            runner,
            config,
        });

        let workers = (0..worker_count)
            .map(|n| {
                let receiver = receiver.clone();
                let worker = shared.clone();
                tokio::spawn(async move {
                    debug!(worker = n, "dispatch worker started");
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else { break };
                        DispatchWorker::handle_event(&worker, Arc::new(event)).await;
                    }
                    debug!(worker = n, "dispatch worker stopped");
                })
            })
            .collect();

        info!(workers = worker_count, "event dispatcher started");
        Self { sender, store, workers }
    }

    /// Enqueue an event without waiting for it to run. An event that cannot
    /// be queued is dead-lettered, never dropped.
    pub async fn dispatch(&self, event: ChangeEvent) -> DispatchOutcome {
        let (reason, event) = match self.sender.try_send(event) {
            Ok(()) => return DispatchOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(event)) => (reasons::QUEUE_FULL, event),
            Err(mpsc::error::TrySendError::Closed(event)) => (reasons::DISPATCHER_CLOSED, event),
        };
        write_dead_letter(self.store.as_ref(), &event, None, reason, None, 0).await;
        DispatchOutcome::DeadLettered
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Free slots in the queue
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }
}

#[async_trait]
impl ChangeListener for EventDispatcher {
    async fn on_change(&self, event: ChangeEvent) {
        self.dispatch(event).await;
    }
}
