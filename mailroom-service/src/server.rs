//! HTTP server with graceful shutdown

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{error::Result, state::AppState};

/// Slack on top of the upload limit for the rest of the multipart body
const BODY_SLACK_BYTES: u64 = 1024 * 1024;

/// Server instance
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Run the server with the given router
    ///
    /// The request deadline returns 504 on expiry; an in-flight write queue
    /// submission still runs to completion, only its future is abandoned.
    /// On shutdown the listener stops accepting, in-flight requests finish
    /// under their deadline, then the write queue drains and the store closes.
    pub async fn serve(self, app: Router) -> Result<()> {
        let config = &self.state.config;
        let addr: SocketAddr = format!("{}:{}", config.service.host, config.service.port)
            .parse()
            .map_err(|e| {
                crate::error::Error::Validation(format!(
                    "invalid bind address {}:{}: {}",
                    config.service.host, config.service.port, e
                ))
            })?;

        let body_limit = (config.uploads.max_upload_bytes + BODY_SLACK_BYTES) as usize;

        let app = app
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::GATEWAY_TIMEOUT,
                config.request_timeout(),
            ))
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new())
                    .on_response(DefaultOnResponse::new()),
            );

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(
            environment = ?config.service.environment,
            "Mailroom service listening on {}",
            addr
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("Draining write queue before exit");
        self.state.shutdown().await;
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, draining requests...");
}
