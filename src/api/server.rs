//! HTTP server lifecycle: bind, serve the router, shut down gracefully on
//! Ctrl-C or an explicit signal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::router::api_router;
use crate::api::types::ApiContext;
use crate::config::ApiConfig;
use crate::pipeline::CodingPipeline;

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ApiServer {
    /// Signal shutdown and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
        let _ = self.task.await;
    }

    /// Run until Ctrl-C, then shut down.
    pub async fn wait_for_ctrl_c(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {e}");
        }
        self.shutdown().await;
    }
}

/// Bind `config.host:config.port` and spawn the server task.
pub async fn start_api_server(
    pipeline: Arc<CodingPipeline>,
    config: ApiConfig,
) -> Result<ApiServer, std::io::Error> {
    let listener =
        tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    if config.shared_secret.is_none() {
        tracing::warn!("SRVC_SHARED_SECRET is not set; login is disabled");
    }

    let app = api_router(ApiContext::new(pipeline, config));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }
        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
