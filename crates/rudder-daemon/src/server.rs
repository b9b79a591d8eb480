//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::worker::spawn_workers;
use rudder_control::{ControlPlane, ControlPlaneBuilder};
use rudder_dispatch::{GithubBackend, StaticInstallationTokens, WebhookBackend};
use rudder_release::AesGcmCipher;
use rudder_store::InMemoryTaskQueue;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Rudder daemon server
pub struct Server {
    config: DaemonConfig,
    control: Arc<ControlPlane>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let control = build_control_plane(&config)?;
        Ok(Self {
            config,
            control: Arc::new(control),
        })
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    /// Run the HTTP server and task workers until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(AppState::new(self.control.clone()), &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = spawn_workers(self.control.clone(), &self.config.worker, shutdown_rx);

        tracing::info!(
            listen_addr = %addr,
            workers = workers.len(),
            "Rudder daemon listening"
        );

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        tracing::info!("Rudder daemon shutting down");
        let _ = shutdown_tx.send(true);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Worker ended abnormally");
            }
        }

        served
    }
}

/// Assemble the control plane with the configured backends and secrets key
pub fn build_control_plane(config: &DaemonConfig) -> DaemonResult<ControlPlane> {
    let cipher = match &config.secrets.aes_key {
        Some(key) => AesGcmCipher::from_base64(key)
            .map_err(|e| DaemonError::Config(format!("Invalid secrets.aes_key: {}", e)))?,
        None => {
            tracing::warn!("No secrets.aes_key configured, sensitive variables use a random key");
            AesGcmCipher::ephemeral()
        }
    };

    let dispatch = &config.dispatch;
    let tokens = match &dispatch.github_token {
        Some(token) => StaticInstallationTokens::new().with_fallback(token.clone()),
        None => StaticInstallationTokens::new(),
    };
    let github = GithubBackend::with_timeout(Arc::new(tokens), dispatch.http_timeout())
        .map_err(|e| DaemonError::Config(e.to_string()))?
        .with_api_base(dispatch.github_api_base.clone())
        .with_retry(dispatch.retry_policy());
    let webhook = WebhookBackend::with_timeout(dispatch.http_timeout())
        .map_err(|e| DaemonError::Config(e.to_string()))?
        .with_retry(dispatch.retry_policy());

    Ok(ControlPlaneBuilder::new()
        .with_queue(Arc::new(InMemoryTaskQueue::new(config.worker.max_attempts)))
        .with_cipher(Arc::new(cipher))
        .with_backend(Arc::new(github))
        .with_backend(Arc::new(webhook))
        .with_config(config.control_plane())
        .build())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
