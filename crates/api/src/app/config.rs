//! Server settings read from the environment.

use std::time::Duration;

use varprice_infra::jobs::JobConfig;
use varprice_infra::task_queue::TaskWorkerConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `VARPRICE_BIND_ADDR`, default `0.0.0.0:8080`.
    pub bind_addr: String,
    /// `VARPRICE_WORKERS`, default 2.
    pub workers: usize,
    /// `VARPRICE_SEED_DEMO=1` loads a small demo catalog at startup.
    pub seed_demo: bool,
    pub job: JobConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            workers: 2,
            seed_demo: false,
            job: JobConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("VARPRICE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            workers: std::env::var("VARPRICE_WORKERS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.workers),
            seed_demo: std::env::var("VARPRICE_SEED_DEMO")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            job: JobConfig::from_env(),
        }
    }

    pub fn worker_config(&self) -> TaskWorkerConfig {
        TaskWorkerConfig::default()
            .with_name("price-worker")
            .with_workers(self.workers)
            .with_poll_interval(Duration::from_millis(200))
    }
}
