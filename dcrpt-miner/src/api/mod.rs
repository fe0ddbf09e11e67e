//! HTTP status API.
//!
//! A small read-only surface over the telemetry store, served with Axum when
//! `api.listen` is configured.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub mod v1;

pub use v1::AppState;

/// Build the full router with every API version mounted.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1::routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `listen` until `shutdown` is cancelled.
pub async fn serve(listen: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| Error::Api(format!("cannot bind {listen}: {e}")))?;
    info!(listen = %listen, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Api(e.to_string()))?;

    debug!("API server stopped");
    Ok(())
}
