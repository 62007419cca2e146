// src/main.rs
use anyhow::Result;
use proxy_topology::{
    admin::{AdminHandler, AdminServerBuilder},
    config, events,
    metrics::MetricsRegistry,
    TcpConnector, Topology,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proxy_topology=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "topology.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;
    let admin = config.admin.clone();

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);

    let topology = Topology::with_metrics(
        config,
        Arc::new(TcpConnector::new()),
        Some(metrics_registry.collector()),
    )?;

    // Log topology events
    tokio::spawn(events::log_events(topology.subscribe()));

    topology.connect().await?;

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    // Start admin server if enabled
    let admin_task = if admin.enabled {
        let server = AdminServerBuilder::new(admin.listen)
            .with_handler(AdminHandler::new(topology.clone(), Some(metrics_registry.clone())))
            .bind()
            .await?;

        let mut stop_rx = stop_rx.clone();
        Some(tokio::spawn(server.serve(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        })))
    } else {
        None
    };

    match topology.wait_connected().await {
        Ok(()) => info!("Connected to {} proxies", topology.state().up_count()),
        Err(e) => warn!("Still waiting for a proxy: {}", e),
    }

    shutdown_signal().await;

    let _ = stop_tx.send(true);
    topology.destroy().await;

    if let Some(task) = admin_task {
        if let Err(e) = task.await? {
            error!("Admin server error: {}", e);
        }
    }

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
