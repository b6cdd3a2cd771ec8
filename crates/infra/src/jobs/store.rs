//! Job registry over a [`RecordStore`].
//!
//! Every mutation is a read-modify-write guarded by the record version, so two
//! workers updating the same job never lose each other's writes: the loser of a
//! race re-reads and re-applies its change.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use varprice_core::{ExpectedVersion, JobId};

use super::types::PriceJob;
use crate::record_store::{RecordStore, RecordStoreError};

/// What an update closure wants done with the job it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMutation {
    Write,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} still contended after {1} attempts")]
    Contention(JobId, usize),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<RecordStoreError> for JobStoreError {
    fn from(e: RecordStoreError) -> Self {
        JobStoreError::Storage(e.to_string())
    }
}

pub trait JobStore: Send + Sync {
    fn create(&self, job: &PriceJob) -> Result<(), JobStoreError>;

    fn get(&self, id: &JobId) -> Result<Option<PriceJob>, JobStoreError>;

    /// Atomically apply `f` to the stored job.
    ///
    /// `f` may run several times (once per attempt) and always sees the latest
    /// stored state. Returns the job as written (or as read, on `Skip`), or
    /// `None` when no such job exists.
    fn update(
        &self,
        id: &JobId,
        f: &mut dyn FnMut(&mut PriceJob) -> JobMutation,
    ) -> Result<Option<PriceJob>, JobStoreError>;

    /// Returns whether a job was removed.
    fn delete(&self, id: &JobId) -> Result<bool, JobStoreError>;

    fn list_ids(&self) -> Result<Vec<JobId>, JobStoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn create(&self, job: &PriceJob) -> Result<(), JobStoreError> {
        (**self).create(job)
    }

    fn get(&self, id: &JobId) -> Result<Option<PriceJob>, JobStoreError> {
        (**self).get(id)
    }

    fn update(
        &self,
        id: &JobId,
        f: &mut dyn FnMut(&mut PriceJob) -> JobMutation,
    ) -> Result<Option<PriceJob>, JobStoreError> {
        (**self).update(id, f)
    }

    fn delete(&self, id: &JobId) -> Result<bool, JobStoreError> {
        (**self).delete(id)
    }

    fn list_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
        (**self).list_ids()
    }
}

/// [`JobStore`] persisting each job as one JSON record keyed by its id.
#[derive(Debug)]
pub struct RecordJobStore<R: RecordStore> {
    records: R,
    retry_limit: usize,
}

impl<R: RecordStore> RecordJobStore<R> {
    pub fn new(records: R) -> Self {
        Self {
            records,
            retry_limit: 64,
        }
    }

    pub fn with_retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    fn decode(value: serde_json::Value) -> Result<PriceJob, JobStoreError> {
        serde_json::from_value(value).map_err(|e| JobStoreError::Serialization(e.to_string()))
    }

    fn encode(job: &PriceJob) -> Result<serde_json::Value, JobStoreError> {
        serde_json::to_value(job).map_err(|e| JobStoreError::Serialization(e.to_string()))
    }
}

impl<R: RecordStore> JobStore for RecordJobStore<R> {
    fn create(&self, job: &PriceJob) -> Result<(), JobStoreError> {
        match self
            .records
            .set(job.id.as_str(), Self::encode(job)?, ExpectedVersion::Absent)
        {
            Ok(_) => Ok(()),
            Err(RecordStoreError::Concurrency { .. }) => {
                Err(JobStoreError::AlreadyExists(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &JobId) -> Result<Option<PriceJob>, JobStoreError> {
        self.records
            .get(id.as_str())?
            .map(|record| Self::decode(record.value))
            .transpose()
    }

    fn update(
        &self,
        id: &JobId,
        f: &mut dyn FnMut(&mut PriceJob) -> JobMutation,
    ) -> Result<Option<PriceJob>, JobStoreError> {
        for attempt in 1..=self.retry_limit {
            let Some(record) = self.records.get(id.as_str())? else {
                return Ok(None);
            };
            let mut job = Self::decode(record.value)?;

            if f(&mut job) == JobMutation::Skip {
                return Ok(Some(job));
            }

            match self.records.set(
                id.as_str(),
                Self::encode(&job)?,
                ExpectedVersion::Exact(record.version),
            ) {
                Ok(_) => return Ok(Some(job)),
                Err(RecordStoreError::Concurrency { actual: 0, .. }) => return Ok(None),
                Err(RecordStoreError::Concurrency { .. }) => {
                    debug!(job_id = %id, attempt, "job record changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(JobStoreError::Contention(id.clone(), self.retry_limit))
    }

    fn delete(&self, id: &JobId) -> Result<bool, JobStoreError> {
        Ok(self.records.delete(id.as_str())?)
    }

    fn list_ids(&self) -> Result<Vec<JobId>, JobStoreError> {
        Ok(self
            .records
            .list_keys_by_prefix(JobId::PREFIX)?
            .into_iter()
            .filter_map(|key| key.parse().ok())
            .collect())
    }
}
