use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;

use bricklayers_server::config::AppConfig;
use bricklayers_server::state::AppState;
use bricklayers_server::{metrics, routes, sweeper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    init_logging(&config);

    tracing::info!(port = config.port, "starting BrickLayers job service");
    config.ensure_directories()?;

    let metrics_handle = metrics::install();
    let state = Arc::new(AppState::new(config.clone(), metrics_handle));

    let shutdown = CancellationToken::new();
    let sweeper_handle = sweeper::spawn(config.clone(), shutdown.clone());

    let app = routes::create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = sweeper_handle.await;
    tracing::info!("server stopped");

    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.as_str()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    cancel.cancel();
}
