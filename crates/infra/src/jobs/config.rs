//! Job processing settings.

use std::time::Duration;

use crate::task_queue::RetryPolicy;

/// Tunables for job batching, logging and retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Target ids per batch.
    pub batch_size: usize,
    /// Log entries kept per job (oldest dropped first).
    pub max_logs: usize,
    /// Delay between consecutive batch start times.
    pub batch_stagger: Duration,
    /// How long a finished job is kept after its last update.
    pub retention: Duration,
    /// Interval of the recurring cleanup action.
    pub cleanup_interval: Duration,
    /// Read-modify-write attempts before giving up on a contended job record.
    pub cas_retry_limit: usize,
    /// Re-runs of a failed batch action before it is written off.
    pub retry: RetryPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_logs: 100,
            batch_stagger: Duration::from_secs(1),
            retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(3600),
            cas_retry_limit: 64,
            retry: RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(60)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl JobConfig {
    /// Defaults overridden by `VARPRICE_*` environment variables.
    ///
    /// Unset or unparseable values keep the default; zero sizes are raised to 1.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse::<usize>("VARPRICE_BATCH_SIZE")
                .unwrap_or(defaults.batch_size)
                .max(1),
            max_logs: env_parse::<usize>("VARPRICE_MAX_LOGS")
                .unwrap_or(defaults.max_logs)
                .max(1),
            batch_stagger: env_parse("VARPRICE_BATCH_STAGGER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.batch_stagger),
            retention: env_parse("VARPRICE_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            cleanup_interval: env_parse::<u64>("VARPRICE_CLEANUP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            cas_retry_limit: defaults.cas_retry_limit,
            retry: RetryPolicy {
                max_attempts: env_parse("VARPRICE_BATCH_MAX_RETRIES")
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: env_parse("VARPRICE_BATCH_RETRY_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                ..defaults.retry
            },
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_logs(mut self, max_logs: usize) -> Self {
        self.max_logs = max_logs.max(1);
        self
    }

    pub fn with_batch_stagger(mut self, stagger: Duration) -> Self {
        self.batch_stagger = stagger;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
