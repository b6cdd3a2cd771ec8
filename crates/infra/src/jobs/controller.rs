//! Job controller: start, process, observe and cancel bulk price jobs.
//!
//! `start_job` persists the job and schedules one `price_batch` action per
//! batch, staggered in time, then returns. Each action later calls
//! [`JobController::process_batch`], which runs the mutation engine over its
//! slice and folds the result into the job with a single atomic progress
//! update. Actions may be delivered more than once, concurrently and out of
//! order. A batch whose action keeps failing is retried by the worker; when
//! retries run out, [`JobController::abandon_batch`] writes it off with an
//! error line so the job can still complete.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use varprice_core::{JobId, PriceError, PriceInput, ProductId, VariantId, validate_targets};

use super::config::JobConfig;
use super::store::{JobMutation, JobStore, JobStoreError};
use super::types::{ActiveJob, JobStatus, JobStatusView, PriceJob, ProgressOutcome};
use crate::catalog_store::CatalogStore;
use crate::mutation::{MutationEngine, MutationOutcome};
use crate::task_queue::{TaskQueue, TaskQueueError, TaskWorker};

/// Hook name of per-batch actions.
pub const PRICE_BATCH_HOOK: &str = "price_batch";
/// Hook name of the recurring cleanup action.
pub const CLEANUP_HOOK: &str = "cleanup_jobs";

/// Payload of a `price_batch` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub job_id: JobId,
    pub batch_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartJobError {
    #[error(transparent)]
    Invalid(#[from] PriceError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("failed to schedule batches: {0}")]
    Schedule(TaskQueueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelJobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

pub struct JobController<S: JobStore, C: CatalogStore, Q: TaskQueue> {
    jobs: S,
    engine: MutationEngine<C>,
    queue: Q,
    config: JobConfig,
}

impl<S, C, Q> JobController<S, C, Q>
where
    S: JobStore,
    C: CatalogStore,
    Q: TaskQueue,
{
    pub fn new(jobs: S, catalog: C, queue: Q, config: JobConfig) -> Self {
        Self {
            jobs,
            engine: MutationEngine::new(catalog),
            queue,
            config,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        self.engine.catalog()
    }

    pub fn jobs(&self) -> &S {
        &self.jobs
    }

    /// Validate, persist the job and schedule its batches. Does not wait for any batch.
    pub fn start_job(
        &self,
        target_ids: Vec<VariantId>,
        parent_ids: Vec<ProductId>,
        regular: &str,
        sale: Option<&str>,
    ) -> Result<JobId, StartJobError> {
        validate_targets(&target_ids)?;
        let input = PriceInput::parse(regular, sale)?;
        if input.is_noop() {
            warn!(targets = target_ids.len(), "price job leaves every price unchanged");
        }

        let now = Utc::now();
        let job = PriceJob::new(JobId::new(), target_ids, parent_ids, &input, now);
        self.jobs.create(&job)?;

        let batches = job.batch_count(self.config.batch_size);
        for batch_index in 0..batches {
            let at = now + self.batch_offset(batch_index);
            let scheduled = serde_json::to_value(BatchPayload {
                job_id: job.id.clone(),
                batch_index,
            })
            .map_err(|e| TaskQueueError::InvalidSchedule(e.to_string()))
            .and_then(|payload| self.queue.schedule_at(at, PRICE_BATCH_HOOK, payload));

            if let Err(e) = scheduled {
                warn!(job_id = %job.id, batch_index, error = %e, "failed to schedule batch, cancelling job");
                if let Err(cancel_err) = self.cancel_job(&job.id) {
                    warn!(job_id = %job.id, error = %cancel_err, "failed to cancel unscheduled job");
                }
                return Err(StartJobError::Schedule(e));
            }
        }

        info!(
            job_id = %job.id,
            total = job.total,
            batches,
            "price job started"
        );

        Ok(job.id)
    }

    fn batch_offset(&self, batch_index: usize) -> chrono::Duration {
        u32::try_from(batch_index)
            .ok()
            .and_then(|k| self.config.batch_stagger.checked_mul(k))
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(chrono::Duration::zero)
    }

    /// Apply one batch of a job. Safe to call repeatedly and concurrently.
    pub fn process_batch(&self, job_id: &JobId, batch_index: usize) -> Result<(), JobStoreError> {
        let Some(job) = self.jobs.get(job_id)? else {
            debug!(job_id = %job_id, batch_index, "batch for unknown job ignored");
            return Ok(());
        };

        if job.status == JobStatus::Cancelled {
            debug!(job_id = %job_id, batch_index, "batch for cancelled job ignored");
            return Ok(());
        }
        if job.completed_batches.contains(&batch_index) {
            debug!(job_id = %job_id, batch_index, "batch already applied");
            return Ok(());
        }

        let ids = job.batch(batch_index, self.config.batch_size);
        if ids.is_empty() {
            return Ok(());
        }

        let outcome = self.engine.apply(ids, &job.price_input());
        let logs = batch_log_lines(batch_index + 1, &outcome);

        let progress = self.record_progress(job_id, Some(batch_index), ids.len(), logs)?;
        debug!(
            job_id = %job_id,
            batch_index,
            updated = outcome.updated,
            progress = ?progress,
            "batch processed"
        );

        Ok(())
    }

    /// Count a batch that could not be processed as handled and log why.
    ///
    /// Same dedup and cancellation rules as a normal batch, so a batch that did
    /// get recorded is not counted twice.
    pub fn abandon_batch(
        &self,
        job_id: &JobId,
        batch_index: usize,
        reason: &str,
    ) -> Result<ProgressOutcome, JobStoreError> {
        let Some(job) = self.jobs.get(job_id)? else {
            return Ok(ProgressOutcome::Missing);
        };
        let size = job.batch(batch_index, self.config.batch_size).len();

        error!(job_id = %job_id, batch_index, reason, "batch abandoned after retries");
        let line = format!("Batch {}: Error - {reason}", batch_index + 1);
        self.record_progress(job_id, Some(batch_index), size, vec![line])
    }

    /// Add `delta` handled items and `logs` to a job, completing it when done.
    ///
    /// No-op on a missing or cancelled job.
    pub fn update_job_progress(
        &self,
        job_id: &JobId,
        delta: usize,
        logs: Vec<String>,
    ) -> Result<ProgressOutcome, JobStoreError> {
        self.record_progress(job_id, None, delta, logs)
    }

    fn record_progress(
        &self,
        job_id: &JobId,
        batch_index: Option<usize>,
        delta: usize,
        logs: Vec<String>,
    ) -> Result<ProgressOutcome, JobStoreError> {
        let max_logs = self.config.max_logs;
        let mut outcome = ProgressOutcome::Missing;

        self.jobs.update(job_id, &mut |job| {
            outcome = job.apply_progress(batch_index, delta, logs.clone(), Utc::now(), max_logs);
            match outcome {
                ProgressOutcome::Advanced { .. } => JobMutation::Write,
                _ => JobMutation::Skip,
            }
        })?;

        if let ProgressOutcome::Advanced {
            completed: true, ..
        } = outcome
        {
            info!(job_id = %job_id, "price job completed");
        }

        Ok(outcome)
    }

    pub fn get_job_status(&self, job_id: &JobId) -> Result<Option<JobStatusView>, JobStoreError> {
        Ok(self.jobs.get(job_id)?.map(|job| job.status_view()))
    }

    /// Mark a job cancelled and drop its pending batches.
    ///
    /// Batches already running finish. A job that already completed stays completed.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<(), CancelJobError> {
        let max_logs = self.config.max_logs;
        let mut cancelled = false;

        let job = self.jobs.update(job_id, &mut |job| {
            cancelled = job.cancel(Utc::now(), max_logs);
            if cancelled {
                JobMutation::Write
            } else {
                JobMutation::Skip
            }
        })?;

        if job.is_none() {
            return Err(CancelJobError::NotFound(job_id.clone()));
        }

        match self
            .queue
            .cancel_all_matching(PRICE_BATCH_HOOK, &json!({ "job_id": job_id }))
        {
            Ok(removed) => info!(job_id = %job_id, cancelled, removed, "price job cancelled"),
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to unschedule batches"),
        }

        Ok(())
    }

    fn processing_jobs(&self) -> Result<Vec<PriceJob>, JobStoreError> {
        let mut jobs = Vec::new();
        for id in self.jobs.list_ids()? {
            if let Some(job) = self.jobs.get(&id)? {
                if job.status == JobStatus::Processing {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    pub fn get_active_jobs(&self) -> Result<Vec<ActiveJob>, JobStoreError> {
        Ok(self
            .processing_jobs()?
            .into_iter()
            .map(|job| ActiveJob {
                status: job.status_view(),
                job_id: job.id,
                variation_ids: job.target_ids,
            })
            .collect())
    }

    /// Every id targeted by a job still processing.
    pub fn get_processing_variation_ids(&self) -> Result<BTreeSet<VariantId>, JobStoreError> {
        Ok(self
            .processing_jobs()?
            .into_iter()
            .flat_map(|job| job.target_ids)
            .collect())
    }

    pub fn cleanup_old_jobs(&self) -> Result<usize, JobStoreError> {
        self.cleanup_old_jobs_as_of(Utc::now())
    }

    /// Delete finished jobs last updated more than the retention window before `now`.
    pub fn cleanup_old_jobs_as_of(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let Ok(retention) = chrono::Duration::from_std(self.config.retention) else {
            return Ok(0);
        };
        let cutoff = now - retention;

        let mut removed = 0;
        for id in self.jobs.list_ids()? {
            let Some(job) = self.jobs.get(&id)? else {
                continue;
            };
            if job.is_expired(cutoff) && self.jobs.delete(&id)? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "old price jobs cleaned up");
        }
        Ok(removed)
    }

    /// Apply a price change inline, without creating a job.
    pub fn update_now(
        &self,
        target_ids: &[VariantId],
        regular: &str,
        sale: Option<&str>,
    ) -> Result<MutationOutcome, StartJobError> {
        validate_targets(target_ids)?;
        let input = PriceInput::parse(regular, sale)?;
        if input.is_noop() {
            warn!(targets = target_ids.len(), "inline update leaves every price unchanged");
        }

        let outcome = self.engine.apply(target_ids, &input);
        info!(
            requested = outcome.requested,
            updated = outcome.updated,
            failed = outcome.is_failure(),
            "inline price update applied"
        );
        Ok(outcome)
    }

    /// Schedule the recurring cleanup unless one is already pending.
    ///
    /// Returns whether a new action was scheduled.
    pub fn ensure_cleanup_scheduled(&self) -> Result<bool, TaskQueueError> {
        if self.queue.next_scheduled(CLEANUP_HOOK)?.is_some() {
            return Ok(false);
        }
        self.queue.schedule_recurring(
            Utc::now(),
            self.config.cleanup_interval,
            CLEANUP_HOOK,
            json!({}),
        )?;
        Ok(true)
    }
}

impl<S, C, Q> JobController<S, C, Q>
where
    S: JobStore + 'static,
    C: CatalogStore + 'static,
    Q: TaskQueue + 'static,
{
    /// Bind the batch and cleanup hooks on `worker` and make sure cleanup recurs.
    pub fn register<W: TaskQueue + 'static>(
        self: &Arc<Self>,
        worker: &mut TaskWorker<W>,
    ) -> Result<(), TaskQueueError> {
        let controller = Arc::clone(self);
        worker.register_handler(PRICE_BATCH_HOOK, move |action| {
            let payload: BatchPayload = serde_json::from_value(action.payload.clone())
                .map_err(|e| format!("invalid batch payload: {e}"))?;
            controller
                .process_batch(&payload.job_id, payload.batch_index)
                .map_err(|e| e.to_string())
        });

        let controller = Arc::clone(self);
        worker.register_dead_letter_handler(PRICE_BATCH_HOOK, move |action, error| {
            let payload: BatchPayload = serde_json::from_value(action.payload.clone())
                .map_err(|e| format!("invalid batch payload: {e}"))?;
            controller
                .abandon_batch(&payload.job_id, payload.batch_index, error)
                .map(|_| ())
                .map_err(|e| e.to_string())
        });

        let controller = Arc::clone(self);
        worker.register_handler(CLEANUP_HOOK, move |_action| {
            controller
                .cleanup_old_jobs()
                .map(|_| ())
                .map_err(|e| e.to_string())
        });

        self.ensure_cleanup_scheduled()?;
        Ok(())
    }
}

/// Human-readable log lines for one processed batch (`batch_number` is 1-based).
pub fn batch_log_lines(batch_number: usize, outcome: &MutationOutcome) -> Vec<String> {
    if let Some(error) = &outcome.failure {
        return vec![format!("Batch {batch_number}: Error - {error}")];
    }

    if outcome.updated == 0 {
        let invalid = if outcome.skipped_invalid > 0 {
            format!(", invalid: {}", outcome.skipped_invalid)
        } else {
            String::new()
        };
        return vec![format!(
            "Batch {batch_number}: No updates needed (already correct: {}{invalid})",
            outcome.skipped_same_price
        )];
    }

    let mut skips = Vec::new();
    if outcome.skipped_same_price > 0 {
        skips.push(format!("{} already correct", outcome.skipped_same_price));
    }
    if outcome.skipped_invalid > 0 {
        skips.push(format!("{} invalid", outcome.skipped_invalid));
    }
    let details = if skips.is_empty() {
        String::new()
    } else {
        format!(" ({})", skips.join(", "))
    };

    let mut lines = vec![format!(
        "Batch {batch_number}: Updated {} variations{details}",
        outcome.updated
    )];
    if !outcome.affected_parents.is_empty() {
        lines.push(format!(
            "Synced {} parent products",
            outcome.affected_parents.len()
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use varprice_catalog::Variant;

    use crate::catalog_store::InMemoryCatalogStore;
    use crate::jobs::store::RecordJobStore;
    use crate::jobs::types::{CANCELLED_MESSAGE, COMPLETED_MESSAGE};
    use crate::record_store::InMemoryRecordStore;
    use crate::task_queue::{InMemoryTaskQueue, RetryPolicy};

    type TestController = JobController<
        RecordJobStore<Arc<InMemoryRecordStore>>,
        Arc<InMemoryCatalogStore>,
        Arc<InMemoryTaskQueue>,
    >;

    struct Fixture {
        catalog: Arc<InMemoryCatalogStore>,
        queue: Arc<InMemoryTaskQueue>,
        controller: Arc<TestController>,
    }

    /// `n` published variations priced "10", ten per parent product.
    fn fixture(n: u64) -> Fixture {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        for id in 1..=n {
            catalog.insert_variant(
                Variant::new(VariantId(id), ProductId(1000 + (id - 1) / 10))
                    .with_attribute("size", "M")
                    .with_prices(Some("10"), None),
            );
        }
        let queue = Arc::new(InMemoryTaskQueue::new());
        let jobs = RecordJobStore::new(Arc::new(InMemoryRecordStore::new()));
        let controller = Arc::new(JobController::new(
            jobs,
            catalog.clone(),
            queue.clone(),
            JobConfig::default(),
        ));
        Fixture {
            catalog,
            queue,
            controller,
        }
    }

    fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<VariantId> {
        range.map(VariantId).collect()
    }

    fn messages(view: &JobStatusView) -> Vec<&str> {
        view.logs.iter().map(|l| l.message.as_str()).collect()
    }

    #[test]
    fn start_job_schedules_staggered_batches() {
        let fx = fixture(250);
        let job_id = fx
            .controller
            .start_job(ids(1..=250), vec![ProductId(1000)], "12", None)
            .unwrap();

        let job = fx.controller.jobs().get(&job_id).unwrap().unwrap();
        let pending = fx.queue.pending_for(PRICE_BATCH_HOOK);
        assert_eq!(pending.len(), 3);

        for (k, action) in pending.iter().enumerate() {
            let payload: BatchPayload = serde_json::from_value(action.payload.clone()).unwrap();
            assert_eq!(payload.job_id, job_id);
            assert_eq!(payload.batch_index, k);
            assert_eq!(action.run_at - job.created_at, chrono::Duration::seconds(k as i64));
        }

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Processing);
        assert_eq!(view.total, 250);
        assert_eq!(messages(&view), vec!["Started processing 250 variations..."]);
    }

    #[test]
    fn invalid_input_creates_nothing() {
        let fx = fixture(5);

        assert_eq!(
            fx.controller.start_job(vec![], vec![], "12", None),
            Err(StartJobError::Invalid(PriceError::EmptyTargetSet))
        );
        assert!(matches!(
            fx.controller.start_job(ids(1..=2), vec![], "abc", None),
            Err(StartJobError::Invalid(PriceError::InvalidPriceFormat { .. }))
        ));
        assert!(matches!(
            fx.controller.start_job(ids(1..=2), vec![], "5", Some("-1")),
            Err(StartJobError::Invalid(PriceError::NegativePrice { .. }))
        ));

        assert!(fx.controller.jobs().list_ids().unwrap().is_empty());
        assert!(fx.queue.pending().is_empty());
    }

    #[test]
    fn processing_every_batch_completes_the_job() {
        let fx = fixture(250);
        let job_id = fx
            .controller
            .start_job(ids(1..=250), vec![], "12", Some("11"))
            .unwrap();

        for batch in 0..3 {
            fx.controller.process_batch(&job_id, batch).unwrap();
        }

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.processed, 250);
        assert_eq!(view.percentage, 100);

        let logs = messages(&view);
        assert!(logs.contains(&"Batch 1: Updated 100 variations"));
        assert!(logs.contains(&"Synced 10 parent products"));
        assert!(logs.contains(&"Batch 3: Updated 50 variations"));
        assert_eq!(logs.last(), Some(&COMPLETED_MESSAGE));

        let prices = fx.catalog.variant(VariantId(250)).unwrap().prices;
        assert_eq!(prices.regular.as_deref(), Some("12"));
        assert_eq!(prices.price.as_deref(), Some("11"));
    }

    #[test]
    fn batches_complete_in_any_order() {
        let fx = fixture(250);
        let job_id = fx.controller.start_job(ids(1..=250), vec![], "12", None).unwrap();

        for batch in [2, 0, 1] {
            fx.controller.process_batch(&job_id, batch).unwrap();
        }

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.processed, 250);
    }

    #[test]
    fn redelivered_batch_changes_nothing() {
        let fx = fixture(150);
        let job_id = fx.controller.start_job(ids(1..=150), vec![], "12", None).unwrap();

        fx.controller.process_batch(&job_id, 0).unwrap();
        let writes = fx.catalog.write_calls();
        let before = fx.controller.get_job_status(&job_id).unwrap().unwrap();

        fx.controller.process_batch(&job_id, 0).unwrap();
        let after = fx.controller.get_job_status(&job_id).unwrap().unwrap();

        assert_eq!(after.processed, 100);
        assert_eq!(after.logs, before.logs);
        assert_eq!(fx.catalog.write_calls(), writes);
    }

    #[test]
    fn cancel_after_first_batch_stops_the_rest() {
        let fx = fixture(250);
        let job_id = fx.controller.start_job(ids(1..=250), vec![], "12", None).unwrap();

        fx.controller.process_batch(&job_id, 0).unwrap();
        fx.controller.cancel_job(&job_id).unwrap();
        assert!(fx.queue.pending_for(PRICE_BATCH_HOOK).is_empty());

        // An action claimed before cancellation still runs, and must be ignored.
        fx.controller.process_batch(&job_id, 1).unwrap();

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert_eq!(view.processed, 100);
        assert_eq!(view.percentage, 40);
        assert_eq!(messages(&view).last(), Some(&CANCELLED_MESSAGE));
        assert_eq!(
            fx.catalog.variant(VariantId(150)).unwrap().prices.regular.as_deref(),
            Some("10")
        );
    }

    #[test]
    fn cancel_only_unschedules_its_own_batches() {
        let fx = fixture(300);
        let a = fx.controller.start_job(ids(1..=200), vec![], "12", None).unwrap();
        let b = fx.controller.start_job(ids(201..=300), vec![], "12", None).unwrap();

        fx.controller.cancel_job(&a).unwrap();

        let pending = fx.queue.pending_for(PRICE_BATCH_HOOK);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload["job_id"], b.as_str());
    }

    #[test]
    fn cancel_unknown_or_completed_job() {
        let fx = fixture(5);
        let unknown = JobId::new();
        assert_eq!(
            fx.controller.cancel_job(&unknown),
            Err(CancelJobError::NotFound(unknown.clone()))
        );

        let job_id = fx.controller.start_job(ids(1..=5), vec![], "12", None).unwrap();
        fx.controller.process_batch(&job_id, 0).unwrap();
        fx.controller.cancel_job(&job_id).unwrap();

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert!(!messages(&view).contains(&CANCELLED_MESSAGE));
    }

    #[test]
    fn write_failure_is_logged_and_counted() {
        let fx = fixture(20);
        let job_id = fx.controller.start_job(ids(1..=20), vec![], "12", None).unwrap();
        fx.catalog.fail_next_writes(1);

        fx.controller.process_batch(&job_id, 0).unwrap();

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.processed, 20);
        assert_eq!(view.status, JobStatus::Completed);
        assert!(messages(&view).contains(
            &"Batch 1: Error - transaction aborted: injected write failure"
        ));
        assert_eq!(
            fx.catalog.variant(VariantId(1)).unwrap().prices.regular.as_deref(),
            Some("10")
        );
    }

    #[test]
    fn batch_log_reports_skips() {
        let fx = fixture(3);
        fx.catalog
            .insert_variant(Variant::new(VariantId(2), ProductId(1000)).with_prices(Some("12"), None));

        let job_id = fx
            .controller
            .start_job(vec![VariantId(1), VariantId(2), VariantId(99)], vec![], "12", None)
            .unwrap();
        fx.controller.process_batch(&job_id, 0).unwrap();
        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert!(messages(&view).contains(&"Batch 1: Updated 1 variations (1 already correct, 1 invalid)"));
        assert!(messages(&view).contains(&"Synced 1 parent products"));

        let again = fx
            .controller
            .start_job(vec![VariantId(1), VariantId(2), VariantId(99)], vec![], "12", None)
            .unwrap();
        fx.controller.process_batch(&again, 0).unwrap();
        let view = fx.controller.get_job_status(&again).unwrap().unwrap();
        assert!(messages(&view).contains(&"Batch 1: No updates needed (already correct: 2, invalid: 1)"));
    }

    #[test]
    fn active_jobs_and_processing_ids() {
        let fx = fixture(30);
        let running = fx.controller.start_job(ids(1..=20), vec![], "12", None).unwrap();
        let done = fx.controller.start_job(ids(15..=30), vec![], "12", None).unwrap();
        fx.controller.process_batch(&done, 0).unwrap();

        let active = fx.controller.get_active_jobs().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].job_id, running);
        assert_eq!(active[0].variation_ids.len(), 20);

        let processing = fx.controller.get_processing_variation_ids().unwrap();
        assert_eq!(processing, ids(1..=20).into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn concurrent_progress_updates_are_not_lost() {
        let fx = fixture(1);
        let job_id = fx
            .controller
            .start_job(ids(1..=1).repeat(1000), vec![], "12", None)
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let controller = fx.controller.clone();
                let id = job_id.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        controller
                            .update_job_progress(&id, 5, vec![format!("t{t}-{i}")])
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.processed, 400);
        // One start line plus one line per update.
        assert_eq!(view.logs.len(), 81);
        assert_eq!(view.status, JobStatus::Processing);
    }

    #[test]
    fn progress_on_missing_job_is_a_noop() {
        let fx = fixture(1);
        assert_eq!(
            fx.controller
                .update_job_progress(&JobId::new(), 1, vec!["x".into()])
                .unwrap(),
            ProgressOutcome::Missing
        );
    }

    #[test]
    fn cleanup_removes_only_old_finished_jobs() {
        let fx = fixture(3);
        let now = Utc::now();
        let input = PriceInput::parse("1", None).unwrap();

        let make = |status: JobStatus, age: chrono::Duration| {
            let mut job = PriceJob::new(JobId::new(), ids(1..=3), vec![], &input, now - age);
            job.status = status;
            fx.controller.jobs().create(&job).unwrap();
            job.id
        };

        let old_done = make(JobStatus::Completed, chrono::Duration::hours(2));
        let old_cancelled = make(JobStatus::Cancelled, chrono::Duration::hours(2));
        let recent_done = make(JobStatus::Completed, chrono::Duration::minutes(10));
        let orphan = make(JobStatus::Processing, chrono::Duration::hours(5));

        assert_eq!(fx.controller.cleanup_old_jobs_as_of(now).unwrap(), 2);

        let jobs = fx.controller.jobs();
        assert!(jobs.get(&old_done).unwrap().is_none());
        assert!(jobs.get(&old_cancelled).unwrap().is_none());
        assert!(jobs.get(&recent_done).unwrap().is_some());
        assert!(jobs.get(&orphan).unwrap().is_some());
    }

    #[test]
    fn update_now_applies_inline() {
        let fx = fixture(5);
        let outcome = fx
            .controller
            .update_now(&ids(1..=5), "15", Some("9.99"))
            .unwrap();
        assert_eq!(outcome.updated, 5);
        assert!(fx.queue.pending().is_empty());
        assert_eq!(
            fx.catalog.variant(VariantId(3)).unwrap().prices.price.as_deref(),
            Some("9.99")
        );

        assert_eq!(
            fx.controller.update_now(&ids(1..=5), "5", Some("6")).unwrap_err(),
            StartJobError::Invalid(PriceError::SaleNotBelowRegular {
                sale: "6".to_string(),
                regular: "5".to_string(),
            })
        );
    }

    #[test]
    fn registered_worker_drains_jobs_and_schedules_cleanup() {
        let fx = fixture(250);
        let mut worker = TaskWorker::new(fx.queue.clone());
        fx.controller.register(&mut worker).unwrap();
        assert!(worker.has_handler(PRICE_BATCH_HOOK));
        assert!(fx.queue.next_scheduled(CLEANUP_HOOK).unwrap().is_some());

        // Registering twice keeps a single recurring cleanup.
        fx.controller.register(&mut worker).unwrap();
        assert_eq!(fx.queue.pending_for(CLEANUP_HOOK).len(), 1);

        let job_id = fx.controller.start_job(ids(1..=250), vec![], "12", None).unwrap();
        worker.run_due(Utc::now() + chrono::Duration::seconds(10)).unwrap();

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert!(fx.queue.pending_for(PRICE_BATCH_HOOK).is_empty());
    }

    /// Job store whose first `failures` updates fail with a storage error.
    struct FlakyJobStore {
        inner: RecordJobStore<Arc<InMemoryRecordStore>>,
        failures: AtomicUsize,
    }

    impl JobStore for FlakyJobStore {
        fn create(&self, job: &PriceJob) -> Result<(), JobStoreError> {
            self.inner.create(job)
        }

        fn get(&self, id: &JobId) -> Result<Option<PriceJob>, JobStoreError> {
            self.inner.get(id)
        }

        fn update(
            &self,
            id: &JobId,
            f: &mut dyn FnMut(&mut PriceJob) -> JobMutation,
        ) -> Result<Option<PriceJob>, JobStoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(JobStoreError::Storage("transient".to_string()));
            }
            self.inner.update(id, f)
        }

        fn delete(&self, id: &JobId) -> Result<bool, JobStoreError> {
            self.inner.delete(id)
        }

        fn list_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
            self.inner.list_ids()
        }
    }

    type FlakyController =
        JobController<FlakyJobStore, Arc<InMemoryCatalogStore>, Arc<InMemoryTaskQueue>>;

    fn flaky_fixture(
        failures: usize,
        retry: RetryPolicy,
    ) -> (Arc<InMemoryCatalogStore>, Arc<InMemoryTaskQueue>, Arc<FlakyController>) {
        let fx = fixture(5);
        let jobs = FlakyJobStore {
            inner: RecordJobStore::new(Arc::new(InMemoryRecordStore::new())),
            failures: AtomicUsize::new(failures),
        };
        let controller = Arc::new(JobController::new(
            jobs,
            fx.catalog.clone(),
            fx.queue.clone(),
            JobConfig::default().with_retry(retry),
        ));
        (fx.catalog, fx.queue, controller)
    }

    fn worker_for(
        controller: &Arc<FlakyController>,
        queue: &Arc<InMemoryTaskQueue>,
    ) -> TaskWorker<Arc<InMemoryTaskQueue>> {
        let mut worker =
            TaskWorker::new(queue.clone()).with_retry_policy(controller.config().retry.clone());
        controller.register(&mut worker).unwrap();
        worker
    }

    #[test]
    fn transient_progress_failure_is_retried_to_completion() {
        let (catalog, queue, controller) =
            flaky_fixture(1, RetryPolicy::fixed(3, std::time::Duration::ZERO));
        let worker = worker_for(&controller, &queue);

        let job_id = controller.start_job(ids(1..=5), vec![], "12", None).unwrap();
        worker.run_due(Utc::now() + chrono::Duration::seconds(10)).unwrap();

        let view = controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.processed, 5);
        assert_eq!(
            catalog.variant(VariantId(1)).unwrap().prices.regular.as_deref(),
            Some("12")
        );
        assert!(queue.pending_for(PRICE_BATCH_HOOK).is_empty());
        assert_eq!(worker.stats().actions_retried, 1);

        // The first attempt wrote the prices; the retry only records progress.
        assert_eq!(
            messages(&view),
            vec![
                "Started processing 5 variations...",
                "Batch 1: No updates needed (already correct: 5)",
                COMPLETED_MESSAGE,
            ]
        );
    }

    #[test]
    fn batch_is_written_off_when_retries_run_out() {
        let (_catalog, queue, controller) =
            flaky_fixture(3, RetryPolicy::fixed(2, std::time::Duration::ZERO));
        let worker = worker_for(&controller, &queue);

        let job_id = controller.start_job(ids(1..=5), vec![], "12", None).unwrap();
        worker.run_due(Utc::now() + chrono::Duration::seconds(10)).unwrap();

        let view = controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.processed, 5);
        assert!(queue.pending_for(PRICE_BATCH_HOOK).is_empty());
        assert_eq!(worker.stats().actions_dead_lettered, 1);

        let error_line = view
            .logs
            .iter()
            .map(|l| l.message.as_str())
            .find(|m| m.starts_with("Batch 1: Error - "))
            .unwrap();
        assert!(error_line.contains("transient"));
    }

    #[test]
    fn noop_job_runs_and_completes_without_writes() {
        let fx = fixture(5);
        let job_id = fx.controller.start_job(ids(1..=5), vec![], "", None).unwrap();
        fx.controller.process_batch(&job_id, 0).unwrap();

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(fx.catalog.write_calls(), 0);
        assert_eq!(
            fx.catalog.variant(VariantId(3)).unwrap().prices.regular.as_deref(),
            Some("10")
        );
    }

    #[test]
    fn abandoning_a_recorded_batch_counts_nothing() {
        let fx = fixture(5);
        let job_id = fx.controller.start_job(ids(1..=5), vec![], "12", None).unwrap();
        fx.controller.process_batch(&job_id, 0).unwrap();

        let outcome = fx.controller.abandon_batch(&job_id, 0, "late failure").unwrap();
        assert_eq!(outcome, ProgressOutcome::AlreadyCounted);
        assert_eq!(
            fx.controller.abandon_batch(&JobId::new(), 0, "gone").unwrap(),
            ProgressOutcome::Missing
        );

        let view = fx.controller.get_job_status(&job_id).unwrap().unwrap();
        assert_eq!(view.processed, 5);
        assert!(!messages(&view).iter().any(|m| m.contains("late failure")));
    }
}
