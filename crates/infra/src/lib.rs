//! Infrastructure layer: storage boundaries, task scheduling, the mutation
//! engine and the bulk price job controller.

pub mod catalog_store;
pub mod jobs;
pub mod mutation;
pub mod record_store;
pub mod task_queue;


pub use catalog_store::{CatalogStore, CatalogStoreError, InMemoryCatalogStore};
pub use jobs::{JobConfig, JobController, JobStore, RecordJobStore};
pub use mutation::{MutationEngine, MutationOutcome};
pub use record_store::{InMemoryRecordStore, RecordStore};
pub use task_queue::{InMemoryTaskQueue, RetryPolicy, TaskQueue, TaskWorker, TaskWorkerConfig};
