use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use cpor::config::PortalConfig;
use cpor::drive;
use cpor::http::{self, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match PortalConfig::load_default() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            return ExitCode::from(2);
        }
    };

    let provider = config
        .drive
        .file_id
        .as_deref()
        .and_then(drive::provider_from_config);
    let state = AppState::new(config.clone(), provider);

    if let Err(err) = http::dashboard::boot_sync(&state).await {
        tracing::warn!(error = %err, "boot sync failed; continuing without primary dataset");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "could not bind server port");
            return ExitCode::from(2);
        }
    };
    tracing::info!(%addr, "portal listening");

    let serve = axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal());
    match serve.await {
        Ok(()) => {
            tracing::info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "server error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
