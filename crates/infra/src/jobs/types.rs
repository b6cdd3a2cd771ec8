//! Job record and the views derived from it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use varprice_core::{JobId, PriceInput, ProductId, SaleDirective, VariantId};

pub const STARTED_MESSAGE: &str = "Started processing";
pub const COMPLETED_MESSAGE: &str = "All variations updated successfully!";
pub const CANCELLED_MESSAGE: &str = "Job cancelled by user.";

/// Job status. Transitions only move forward: processing → completed | cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// One bulk price-update job as persisted in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceJob {
    pub id: JobId,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    #[serde(rename = "variation_ids")]
    pub target_ids: Vec<VariantId>,
    #[serde(rename = "product_ids")]
    pub parent_ids: Vec<ProductId>,
    pub regular_price: String,
    /// `None` keeps the stored sale price, `Some("")` clears it.
    pub sale_price: Option<String>,
    pub logs: Vec<JobLogEntry>,
    /// Batch indexes already counted toward `processed`.
    #[serde(default)]
    pub completed_batches: BTreeSet<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of applying a progress delta to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// No job with that id.
    Missing,
    /// Job was cancelled; nothing changed.
    Cancelled,
    /// This batch was already counted; nothing changed.
    AlreadyCounted,
    Advanced { processed: usize, completed: bool },
}

impl PriceJob {
    pub fn new(
        id: JobId,
        target_ids: Vec<VariantId>,
        parent_ids: Vec<ProductId>,
        input: &PriceInput,
        now: DateTime<Utc>,
    ) -> Self {
        let total = target_ids.len();
        Self {
            id,
            status: JobStatus::Processing,
            total,
            processed: 0,
            target_ids,
            parent_ids,
            regular_price: input.regular.clone(),
            sale_price: input.sale.as_input().map(str::to_string),
            logs: vec![JobLogEntry {
                time: now,
                message: format!("{STARTED_MESSAGE} {total} variations..."),
            }],
            completed_batches: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The price input this job applies, rebuilt from the stored strings.
    pub fn price_input(&self) -> PriceInput {
        PriceInput {
            regular: self.regular_price.clone(),
            sale: SaleDirective::from_input(self.sale_price.as_deref()),
        }
    }

    pub fn batch_count(&self, batch_size: usize) -> usize {
        self.total.div_ceil(batch_size.max(1))
    }

    /// Positional slice `[index * batch_size, (index + 1) * batch_size)`, possibly empty.
    pub fn batch(&self, index: usize, batch_size: usize) -> &[VariantId] {
        let batch_size = batch_size.max(1);
        let start = index.saturating_mul(batch_size).min(self.target_ids.len());
        let end = start.saturating_add(batch_size).min(self.target_ids.len());
        &self.target_ids[start..end]
    }

    fn push_logs(&mut self, messages: impl IntoIterator<Item = String>, now: DateTime<Utc>, max_logs: usize) {
        self.logs.extend(messages.into_iter().map(|message| JobLogEntry { time: now, message }));
        let excess = self.logs.len().saturating_sub(max_logs.max(1));
        self.logs.drain(..excess);
    }

    /// Add `delta` to `processed` (clamped to `total`), append `logs`, and
    /// complete the job when every target has been handled.
    ///
    /// With a `batch_index`, a batch that was already counted changes nothing.
    pub fn apply_progress(
        &mut self,
        batch_index: Option<usize>,
        delta: usize,
        logs: Vec<String>,
        now: DateTime<Utc>,
        max_logs: usize,
    ) -> ProgressOutcome {
        if self.status == JobStatus::Cancelled {
            return ProgressOutcome::Cancelled;
        }
        if let Some(index) = batch_index {
            if !self.completed_batches.insert(index) {
                return ProgressOutcome::AlreadyCounted;
            }
        }

        self.processed = self.processed.saturating_add(delta).min(self.total);

        let mut messages = logs;
        let completed = self.status == JobStatus::Processing && self.processed >= self.total;
        if completed {
            self.status = JobStatus::Completed;
            messages.push(COMPLETED_MESSAGE.to_string());
        }
        self.push_logs(messages, now, max_logs);
        self.updated_at = now;

        ProgressOutcome::Advanced {
            processed: self.processed,
            completed,
        }
    }

    /// Move a processing job to cancelled. Returns false if it was already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>, max_logs: usize) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.push_logs([CANCELLED_MESSAGE.to_string()], now, max_logs);
        self.updated_at = now;
        true
    }

    /// `round(processed / total * 100)`, half away from zero; 0 for an empty job.
    pub fn percentage(&self) -> u8 {
        percentage(self.processed, self.total)
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.status,
            total: self.total,
            processed: self.processed,
            percentage: self.percentage(),
            logs: self.logs.clone(),
        }
    }

    /// Terminal and last touched before `cutoff`.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.updated_at < cutoff
    }
}

pub fn percentage(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let processed = processed.min(total) as u128;
    let total = total as u128;
    ((processed * 200 + total) / (total * 2)) as u8
}

/// Polling view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub percentage: u8,
    pub logs: Vec<JobLogEntry>,
}

/// A job still in `processing`, with the ids it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub status: JobStatusView,
    pub variation_ids: Vec<VariantId>,
}
