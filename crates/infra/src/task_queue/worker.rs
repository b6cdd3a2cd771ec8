//! Task worker: drains due actions from a [`TaskQueue`] and runs their hooks.
//!
//! A failed one-off action is put back on the queue with backoff per the
//! worker's [`RetryPolicy`]. Once retries run out it is dead-lettered: the
//! hook's dead-letter handler, if any, gets the action and the last error.

use std::collections::HashMap;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::{RetryPolicy, ScheduledAction, TaskQueue, TaskQueueError};

/// Hook handler function type.
pub type TaskHandler = Box<dyn Fn(&ScheduledAction) -> Result<(), String> + Send + Sync>;

/// Called with the action and its last error once retries are exhausted.
pub type DeadLetterHandler = Box<dyn Fn(&ScheduledAction, &str) -> Result<(), String> + Send + Sync>;

/// Task worker configuration.
#[derive(Debug, Clone)]
pub struct TaskWorkerConfig {
    /// How often an idle thread polls for due actions
    pub poll_interval: Duration,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum actions claimed per poll
    pub claim_batch: usize,
    /// Name for logging and thread names
    pub name: String,
}

impl Default for TaskWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            workers: 2,
            claim_batch: 8,
            name: "task-worker".to_string(),
        }
    }
}

impl TaskWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_claim_batch(mut self, claim_batch: usize) -> Self {
        self.claim_batch = claim_batch.max(1);
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub actions_run: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
    pub actions_retried: u64,
    pub actions_dead_lettered: u64,
    pub uptime_secs: u64,
}

/// Handle to control running worker threads.
#[derive(Debug)]
pub struct TaskWorkerHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl TaskWorkerHandle {
    /// Request graceful shutdown and wait for every thread to finish its current action.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for join in self.joins {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Dispatches due actions to handlers registered by hook name.
pub struct TaskWorker<Q: TaskQueue> {
    queue: Q,
    handlers: HashMap<String, TaskHandler>,
    dead_letter_handlers: HashMap<String, DeadLetterHandler>,
    retry_policy: RetryPolicy,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<Q: TaskQueue + 'static> TaskWorker<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            dead_letter_handlers: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Register the handler for a hook, replacing any previous one.
    pub fn register_handler<F>(&mut self, hook: impl Into<String>, handler: F)
    where
        F: Fn(&ScheduledAction) -> Result<(), String> + Send + Sync + 'static,
    {
        self.handlers.insert(hook.into(), Box::new(handler));
    }

    /// Register what happens to a `hook` action that failed for the last time.
    pub fn register_dead_letter_handler<F>(&mut self, hook: impl Into<String>, handler: F)
    where
        F: Fn(&ScheduledAction, &str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.dead_letter_handlers.insert(hook.into(), Box::new(handler));
    }

    pub fn has_handler(&self, hook: &str) -> bool {
        self.handlers.contains_key(hook)
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Run every action due at `now` on the calling thread (tests, synchronous use).
    ///
    /// Returns the number of actions executed.
    pub fn run_due(&self, now: DateTime<Utc>) -> Result<usize, TaskQueueError> {
        let mut ran = 0;
        loop {
            let claimed = self.queue.claim_due(now, 64)?;
            if claimed.is_empty() {
                return Ok(ran);
            }
            for action in &claimed {
                let _ = self.execute(action, now);
                ran += 1;
            }
        }
    }

    /// Spawn `config.workers` threads that poll the queue until shutdown.
    pub fn spawn(self, config: TaskWorkerConfig) -> io::Result<TaskWorkerHandle>
    where
        Q: Send + Sync,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = self.stats.clone();
        let worker = Arc::new(self);

        let mut joins = Vec::with_capacity(config.workers);
        for n in 0..config.workers.max(1) {
            let worker = worker.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let join = thread::Builder::new()
                .name(format!("{}-{n}", config.name))
                .spawn(move || worker_loop(&worker, &config, &shutdown))?;
            joins.push(join);
        }

        Ok(TaskWorkerHandle {
            shutdown,
            joins,
            stats,
        })
    }

    /// Run one action. Handler errors and panics are logged and reported, never propagated.
    ///
    /// A failed one-off action is retried or dead-lettered; recurring actions are
    /// already re-armed by the queue.
    fn execute(&self, action: &ScheduledAction, now: DateTime<Utc>) -> Result<(), String> {
        let result = match self.handlers.get(&action.hook) {
            Some(handler) => match catch_unwind(AssertUnwindSafe(|| handler(action))) {
                Ok(result) => result,
                Err(_) => Err("handler panicked".to_string()),
            },
            None => Err(format!("no handler for hook: {}", action.hook)),
        };

        if let Ok(mut s) = self.stats.lock() {
            s.actions_run += 1;
            match result {
                Ok(()) => s.actions_succeeded += 1,
                Err(_) => s.actions_failed += 1,
            }
        }

        match &result {
            Ok(()) => debug!(action_id = %action.id, hook = %action.hook, "action completed"),
            Err(e) => {
                warn!(
                    action_id = %action.id,
                    hook = %action.hook,
                    attempt = action.attempt,
                    error = %e,
                    "action failed"
                );
                if action.interval.is_none() {
                    self.retry_or_dead_letter(action, e, now);
                }
            }
        }

        result
    }

    fn retry_or_dead_letter(&self, action: &ScheduledAction, error: &str, now: DateTime<Utc>) {
        if self.retry_policy.should_retry(action.attempt) {
            let attempt = action.attempt + 1;
            let delay = chrono::Duration::from_std(self.retry_policy.delay_for_attempt(attempt))
                .unwrap_or_else(|_| chrono::Duration::zero());
            let retry = ScheduledAction {
                attempt,
                run_at: now + delay,
                ..action.clone()
            };

            match self.queue.reschedule(retry) {
                Ok(()) => {
                    self.bump(|s| s.actions_retried += 1);
                    debug!(action_id = %action.id, hook = %action.hook, attempt, "action rescheduled");
                    return;
                }
                Err(e) => error!(
                    action_id = %action.id,
                    hook = %action.hook,
                    error = %e,
                    "failed to reschedule action"
                ),
            }
        }

        self.bump(|s| s.actions_dead_lettered += 1);
        warn!(
            action_id = %action.id,
            hook = %action.hook,
            attempts = action.attempt + 1,
            error = %error,
            "action dead-lettered"
        );

        let Some(handler) = self.dead_letter_handlers.get(&action.hook) else {
            return;
        };
        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(action, error))) {
            Ok(outcome) => outcome,
            Err(_) => Err("dead-letter handler panicked".to_string()),
        };
        if let Err(e) = outcome {
            error!(
                action_id = %action.id,
                hook = %action.hook,
                error = %e,
                "dead-letter handler failed"
            );
        }
    }

    fn bump(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }
}

fn worker_loop<Q: TaskQueue + 'static>(
    worker: &TaskWorker<Q>,
    config: &TaskWorkerConfig,
    shutdown: &AtomicBool,
) {
    info!(worker = %config.name, "task worker started");
    let start_time = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        if let Ok(mut s) = worker.stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match worker.queue.claim_due(Utc::now(), config.claim_batch) {
            Ok(claimed) if claimed.is_empty() => thread::sleep(config.poll_interval),
            Ok(claimed) => {
                for action in &claimed {
                    let _ = worker.execute(action, Utc::now());
                }
            }
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to claim actions");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(worker = %config.name, "task worker stopped");
}
