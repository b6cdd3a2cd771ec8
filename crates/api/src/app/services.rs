//! Collaborator wiring for the API process.
//!
//! Everything is in memory: one record store for jobs, one catalog, one task
//! queue shared by the controller (scheduling) and the worker (draining).

use std::sync::Arc;

use anyhow::Context;

use varprice_catalog::{ParentProduct, Variant, VariantStatus};
use varprice_core::{ProductId, VariantId};
use varprice_infra::jobs::{JobConfig, JobController, RecordJobStore};
use varprice_infra::task_queue::{TaskWorker, TaskWorkerConfig, TaskWorkerHandle};
use varprice_infra::{InMemoryCatalogStore, InMemoryRecordStore, InMemoryTaskQueue};

pub type PriceJobController = JobController<
    RecordJobStore<Arc<InMemoryRecordStore>>,
    Arc<InMemoryCatalogStore>,
    Arc<InMemoryTaskQueue>,
>;

pub struct AppServices {
    pub controller: Arc<PriceJobController>,
    pub catalog: Arc<InMemoryCatalogStore>,
    pub queue: Arc<InMemoryTaskQueue>,
}

impl AppServices {
    pub fn in_memory(config: JobConfig) -> Arc<Self> {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let jobs = RecordJobStore::new(Arc::new(InMemoryRecordStore::new()))
            .with_retry_limit(config.cas_retry_limit);
        let controller = Arc::new(JobController::new(
            jobs,
            catalog.clone(),
            queue.clone(),
            config,
        ));

        Arc::new(Self {
            controller,
            catalog,
            queue,
        })
    }

    /// Bind the job hooks and start worker threads draining the shared queue.
    pub fn start_worker(&self, config: TaskWorkerConfig) -> anyhow::Result<TaskWorkerHandle> {
        let mut worker = TaskWorker::new(self.queue.clone())
            .with_retry_policy(self.controller.config().retry.clone());
        self.controller
            .register(&mut worker)
            .context("failed to register job hooks")?;
        let workers = config.workers;
        let handle = worker.spawn(config).context("failed to spawn worker threads")?;
        tracing::info!(workers, "task worker started");
        Ok(handle)
    }
}

/// Load a small catalog: three products sharing size/color combinations.
///
/// Returns the number of variants inserted.
pub fn seed_demo_catalog(catalog: &InMemoryCatalogStore) -> usize {
    let products = [(1, "T-Shirt"), (2, "Hoodie"), (3, "Cap")];
    let sizes = ["S", "M", "L"];
    let colors = ["Red", "Blue"];

    let mut next_id = 100;
    for (product_id, name) in products {
        catalog.insert_product(ParentProduct::new(ProductId(product_id), name));
        for size in sizes {
            for color in colors {
                next_id += 1;
                let mut variant = Variant::new(VariantId(next_id), ProductId(product_id))
                    .with_attribute("color", color)
                    .with_attribute("size", size)
                    .with_prices(Some("20.00"), None);
                if product_id == 3 && size == "L" {
                    variant = variant.with_status(VariantStatus::Draft);
                }
                catalog.insert_variant(variant);
            }
        }
    }

    (next_id - 100) as usize
}
