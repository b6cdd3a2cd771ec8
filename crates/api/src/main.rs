use anyhow::Context;

use varprice_api::app::{self, config::ApiConfig, services::AppServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    varprice_observability::init();

    let config = ApiConfig::from_env();
    let services = AppServices::in_memory(config.job.clone());
    if config.seed_demo {
        let seeded = app::services::seed_demo_catalog(&services.catalog);
        tracing::info!(variants = seeded, "seeded demo catalog");
    }

    let worker = services
        .start_worker(config.worker_config())
        .context("failed to start task worker")?;

    let router = app::build_app(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    tracing::info!("shutting down task worker");
    tokio::task::spawn_blocking(move || worker.shutdown()).await?;

    served.context("http server failed")
}
