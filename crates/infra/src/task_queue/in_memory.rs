use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use super::{ActionId, ScheduledAction, TaskQueue, TaskQueueError};

/// In-memory task queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    actions: Mutex<Vec<ScheduledAction>>,
}

fn poisoned() -> TaskQueueError {
    TaskQueueError::Storage("lock poisoned".to_string())
}

fn step(interval: Duration) -> Option<chrono::Duration> {
    chrono::Duration::from_std(interval)
        .ok()
        .filter(|d| *d > chrono::Duration::zero())
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of pending actions, earliest first.
    pub fn pending(&self) -> Vec<ScheduledAction> {
        let mut actions = match self.actions.lock() {
            Ok(actions) => actions.clone(),
            Err(_) => return Vec::new(),
        };
        actions.sort_by_key(|a| a.run_at);
        actions
    }

    /// Pending actions for one hook, earliest first.
    pub fn pending_for(&self, hook: &str) -> Vec<ScheduledAction> {
        self.pending().into_iter().filter(|a| a.hook == hook).collect()
    }

    fn push(&self, action: ScheduledAction) -> Result<ActionId, TaskQueueError> {
        let id = action.id;
        self.actions.lock().map_err(|_| poisoned())?.push(action);
        Ok(id)
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn schedule_at(
        &self,
        at: DateTime<Utc>,
        hook: &str,
        payload: JsonValue,
    ) -> Result<ActionId, TaskQueueError> {
        self.push(ScheduledAction {
            id: ActionId::new(),
            hook: hook.to_string(),
            payload,
            run_at: at,
            interval: None,
            attempt: 0,
        })
    }

    fn schedule_recurring(
        &self,
        first: DateTime<Utc>,
        interval: Duration,
        hook: &str,
        payload: JsonValue,
    ) -> Result<ActionId, TaskQueueError> {
        if step(interval).is_none() {
            return Err(TaskQueueError::InvalidSchedule(format!(
                "recurring interval out of range: {interval:?}"
            )));
        }

        self.push(ScheduledAction {
            id: ActionId::new(),
            hook: hook.to_string(),
            payload,
            run_at: first,
            interval: Some(interval),
            attempt: 0,
        })
    }

    fn cancel_all_matching(&self, hook: &str, filter: &JsonValue) -> Result<usize, TaskQueueError> {
        let mut actions = self.actions.lock().map_err(|_| poisoned())?;
        let before = actions.len();
        actions.retain(|a| !(a.hook == hook && a.payload_matches(filter)));
        Ok(before - actions.len())
    }

    fn next_scheduled(&self, hook: &str) -> Result<Option<DateTime<Utc>>, TaskQueueError> {
        let actions = self.actions.lock().map_err(|_| poisoned())?;
        Ok(actions
            .iter()
            .filter(|a| a.hook == hook)
            .map(|a| a.run_at)
            .min())
    }

    fn reschedule(&self, action: ScheduledAction) -> Result<(), TaskQueueError> {
        self.push(action).map(|_| ())
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledAction>, TaskQueueError> {
        let mut actions = self.actions.lock().map_err(|_| poisoned())?;
        actions.sort_by_key(|a| a.run_at);

        let due = actions
            .iter()
            .take_while(|a| a.run_at <= now)
            .count()
            .min(limit);

        let claimed: Vec<ScheduledAction> = actions.drain(..due).collect();

        // Re-arm recurring actions; a backlog collapses into a single run.
        for action in &claimed {
            let Some(delta) = action.interval.and_then(step) else {
                continue;
            };
            let mut next = action.run_at + delta;
            if next <= now {
                next = now + delta;
            }
            actions.push(ScheduledAction {
                run_at: next,
                ..action.clone()
            });
        }

        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claims_only_due_actions_in_time_order() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        queue
            .schedule_at(now + chrono::Duration::seconds(1), "h", json!({"n": 2}))
            .unwrap();
        queue.schedule_at(now, "h", json!({"n": 1})).unwrap();
        queue
            .schedule_at(now + chrono::Duration::seconds(60), "h", json!({"n": 3}))
            .unwrap();

        let claimed = queue
            .claim_due(now + chrono::Duration::seconds(1), 10)
            .unwrap();
        let order: Vec<_> = claimed.iter().map(|a| a.payload["n"].clone()).collect();
        assert_eq!(order, vec![json!(1), json!(2)]);
        assert_eq!(queue.pending().len(), 1);
    }

    #[test]
    fn claim_respects_limit() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        for n in 0..5 {
            queue.schedule_at(now, "h", json!({ "n": n })).unwrap();
        }

        assert_eq!(queue.claim_due(now, 2).unwrap().len(), 2);
        assert_eq!(queue.pending().len(), 3);
    }

    #[test]
    fn cancel_matches_hook_and_payload_subset() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        queue
            .schedule_at(now, "price_batch", json!({"job_id": "a", "batch_index": 0}))
            .unwrap();
        queue
            .schedule_at(now, "price_batch", json!({"job_id": "a", "batch_index": 1}))
            .unwrap();
        queue
            .schedule_at(now, "price_batch", json!({"job_id": "b", "batch_index": 0}))
            .unwrap();
        queue.schedule_at(now, "other", json!({"job_id": "a"})).unwrap();

        let removed = queue
            .cancel_all_matching("price_batch", &json!({"job_id": "a"}))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(queue.pending_for("price_batch").len(), 1);
        assert_eq!(queue.pending_for("other").len(), 1);
    }

    #[test]
    fn recurring_actions_are_rearmed() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        queue
            .schedule_recurring(now, Duration::from_secs(3600), "cleanup_jobs", json!({}))
            .unwrap();

        assert_eq!(queue.claim_due(now, 10).unwrap().len(), 1);
        assert_eq!(
            queue.next_scheduled("cleanup_jobs").unwrap(),
            Some(now + chrono::Duration::hours(1))
        );
        assert!(queue.claim_due(now, 10).unwrap().is_empty());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let queue = InMemoryTaskQueue::new();
        assert!(matches!(
            queue.schedule_recurring(Utc::now(), Duration::ZERO, "h", json!({})),
            Err(TaskQueueError::InvalidSchedule(_))
        ));
    }
}
