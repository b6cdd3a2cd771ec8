//! Delayed-action scheduling.
//!
//! An action is a named hook plus a JSON payload that becomes due at a point in
//! time. Delivery is at-least-once: a handler may see the same action twice and
//! must be idempotent. [`TaskWorker`] drains due actions and dispatches them to
//! registered handlers.

pub mod in_memory;
pub mod retry;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub use in_memory::InMemoryTaskQueue;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use worker::{DeadLetterHandler, TaskHandler, TaskWorker, TaskWorkerConfig, TaskWorkerHandle, WorkerStats};

/// Unique scheduled-action identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending invocation of a hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: ActionId,
    pub hook: String,
    pub payload: JsonValue,
    pub run_at: DateTime<Utc>,
    /// Set for recurring actions; the action is re-armed `interval` after `run_at`.
    pub interval: Option<Duration>,
    /// Failed runs so far.
    #[serde(default)]
    pub attempt: u32,
}

impl ScheduledAction {
    /// Whether every key/value in `filter` is present in this action's payload.
    ///
    /// A non-object filter matches only an identical payload.
    pub fn payload_matches(&self, filter: &JsonValue) -> bool {
        match (filter, &self.payload) {
            (JsonValue::Object(wanted), JsonValue::Object(actual)) => wanted
                .iter()
                .all(|(k, v)| actual.get(k).is_some_and(|a| a == v)),
            (wanted, actual) => wanted == actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskQueueError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("task queue storage error: {0}")]
    Storage(String),
}

pub trait TaskQueue: Send + Sync {
    /// Run `hook` once at `at`.
    fn schedule_at(
        &self,
        at: DateTime<Utc>,
        hook: &str,
        payload: JsonValue,
    ) -> Result<ActionId, TaskQueueError>;

    /// Run `hook` at `first` and then every `interval`.
    fn schedule_recurring(
        &self,
        first: DateTime<Utc>,
        interval: Duration,
        hook: &str,
        payload: JsonValue,
    ) -> Result<ActionId, TaskQueueError>;

    /// Drop every pending `hook` action whose payload contains `filter`.
    ///
    /// Returns how many were removed.
    fn cancel_all_matching(&self, hook: &str, filter: &JsonValue) -> Result<usize, TaskQueueError>;

    /// Earliest pending run time for `hook`, if any.
    fn next_scheduled(&self, hook: &str) -> Result<Option<DateTime<Utc>>, TaskQueueError>;

    /// Put a claimed action back, keeping its id, payload and attempt count.
    ///
    /// It becomes due again at its `run_at`.
    fn reschedule(&self, action: ScheduledAction) -> Result<(), TaskQueueError>;

    /// Remove and return up to `limit` actions due at `now`, earliest first.
    ///
    /// Recurring actions are re-armed instead of removed.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledAction>, TaskQueueError>;
}

impl<Q> TaskQueue for Arc<Q>
where
    Q: TaskQueue + ?Sized,
{
    fn schedule_at(
        &self,
        at: DateTime<Utc>,
        hook: &str,
        payload: JsonValue,
    ) -> Result<ActionId, TaskQueueError> {
        (**self).schedule_at(at, hook, payload)
    }

    fn schedule_recurring(
        &self,
        first: DateTime<Utc>,
        interval: Duration,
        hook: &str,
        payload: JsonValue,
    ) -> Result<ActionId, TaskQueueError> {
        (**self).schedule_recurring(first, interval, hook, payload)
    }

    fn cancel_all_matching(&self, hook: &str, filter: &JsonValue) -> Result<usize, TaskQueueError> {
        (**self).cancel_all_matching(hook, filter)
    }

    fn next_scheduled(&self, hook: &str) -> Result<Option<DateTime<Utc>>, TaskQueueError> {
        (**self).next_scheduled(hook)
    }

    fn reschedule(&self, action: ScheduledAction) -> Result<(), TaskQueueError> {
        (**self).reschedule(action)
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledAction>, TaskQueueError> {
        (**self).claim_due(now, limit)
    }
}
