use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use exam_monitor::api::monitor_routes;
use exam_monitor::config::Config;
use exam_monitor::error::{MonitorError, Result};
use exam_monitor::monitor::{MonitorServer, MonitorSettings};
use exam_monitor::store::{ExamStore, MemoryStore};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("exam_monitor=info,warp=warn"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing(config.logging.json);

    let store: Arc<dyn ExamStore> = match &config.monitor.seed_file {
        Some(path) => Arc::new(MemoryStore::from_seed_file(path).await?),
        None => {
            tracing::warn!("EXAM_SEED_FILE not set, starting with an empty exam store");
            Arc::new(MemoryStore::new())
        }
    };

    let server = MonitorServer::new(store, MonitorSettings::from(&config.monitor));
    server.start_sweeper();

    let routes = monitor_routes::monitor_routes(server.clone(), config.ice.clone());

    let (addr, serving) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.bind_address(), shutdown_signal())
        .map_err(|e| MonitorError::InvalidConfiguration(format!("Failed to bind: {}", e)))?;

    tracing::info!(address = %addr, "Exam monitor listening");
    serving.await;

    server.shutdown();
    tracing::info!("Exam monitor shut down gracefully");
    Ok(())
}
