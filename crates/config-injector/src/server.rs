use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::api::{app, state::ApiServerState};
use crate::config::{Config, WebhookConfig};
use crate::reload::ReloadManager;
use crate::state::{build_tls_server_config, load_certified_key, SharedState};

/// Loads the initial state, starts the reload manager and serves the
/// webhook over HTTPS until a shutdown signal arrives. A broken
/// configuration or certificate at startup is fatal, later breakage is
/// handled by the reload manager.
pub async fn run(config: Config) -> Result<()> {
    let webhook_config = WebhookConfig::load(&config.config_file)?;
    let cert = load_certified_key(&config.cert_file, &config.key_file)?;
    let state = SharedState::new(webhook_config, cert);

    let reload_manager = ReloadManager::new(
        state.clone(),
        config.config_file.clone(),
        config.cert_file.clone(),
        config.key_file.clone(),
        config.health_check_interval,
        config.health_check_file.clone(),
    );
    let (reload_shutdown_tx, reload_shutdown_rx) = oneshot::channel();
    let reload_handle = tokio::spawn(reload_manager.run(reload_shutdown_rx));

    let api_state = Arc::new(ApiServerState {
        state: state.clone(),
        config_file: config.config_file,
        cert_file: config.cert_file,
        key_file: config.key_file,
    });

    // the certificate resolver reads the shared state on every handshake,
    // the RustlsConfig itself never has to be rebuilt
    let tls_config = RustlsConfig::from_config(Arc::new(build_tls_server_config(state)));

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "cannot install the shutdown signal handler");
            return;
        }
        info!("shutdown signal received");
        shutdown_handle.graceful_shutdown(None);
    });

    info!(address = %config.addr, "started HTTPS server");
    axum_server::bind_rustls(config.addr, tls_config)
        .handle(handle)
        .serve(app(api_state).into_make_service())
        .await
        .map_err(|e| anyhow!("HTTPS server error: {e}"))?;

    if reload_shutdown_tx.send(()).is_err() {
        error!("Cannot shut down the reload manager task");
    } else if let Err(e) = reload_handle.await {
        error!(
            error = e.to_string().as_str(),
            "Error waiting for the reload manager task"
        );
    }

    Ok(())
}
