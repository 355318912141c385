use std::sync::Arc;

use anyhow::{Context, Error};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use codegen_serve::api::server::create_router;
use codegen_serve::config::ServerConfig;
use codegen_serve::llm::store::{device_label, select_device};
use codegen_serve::AppState;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    let device = select_device(config.force_cpu)?;
    info!(device = device_label(&device), "compute device selected");

    let state = Arc::new(AppState::new(device));

    let source = config.model_source();
    let init_state = Arc::clone(&state);
    let init = tokio::task::spawn_blocking(move || init_state.init(&source))
        .await
        .context("initializer task panicked")?;
    if init.is_err() {
        warn!("serving in degraded mode, generate requests will be rejected until restart");
    }

    let app = create_router(Arc::clone(&state), &config.static_dir);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
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
    info!("shutdown signal received");
}
