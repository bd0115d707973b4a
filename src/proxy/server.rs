//! Proxy server setup and initialization

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::logging::EventSink;

use super::handlers;
use super::state::ProxyState;

/// Build the router for the proxy endpoints
///
/// axum's default 2 MB body limit is disabled; the configured
/// `max_body_size` is enforced by the handlers so oversize requests get
/// the Anthropic error envelope.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/messages/count_tokens", post(handlers::count_tokens))
        .route("/api/event_logging/batch", post(handlers::event_logging_batch))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Start the proxy server
pub async fn start_proxy(
    config: Config,
    events: EventSink,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr;

    let state = ProxyState::from_config(config, events).context("Failed to build proxy state")?;
    tracing::debug!(
        "Transformation pipeline: {:?}",
        state.pipeline.step_names()
    );
    tracing::debug!("Routing rules: {}", state.decider.rule_count());

    let app = build_router(state);

    tracing::info!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Proxy listening on {}", bind_addr);

    // In-flight requests finish before the server returns
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}
