//! Bulk price-update jobs.
//!
//! ## Components
//!
//! - `PriceJob`: persisted job record (status, progress, bounded log)
//! - `JobStore`: atomic read-modify-write access to job records
//! - `JobController`: lifecycle operations and the `price_batch` / `cleanup_jobs` hooks
//! - `JobConfig`: batching, log and retention settings

pub mod config;
pub mod controller;
pub mod store;
pub mod types;

pub use config::JobConfig;
pub use controller::{
    BatchPayload, CLEANUP_HOOK, CancelJobError, JobController, PRICE_BATCH_HOOK, StartJobError,
    batch_log_lines,
};
pub use store::{JobMutation, JobStore, JobStoreError, RecordJobStore};
pub use types::{
    ActiveJob, JobLogEntry, JobStatus, JobStatusView, PriceJob, ProgressOutcome, percentage,
};
