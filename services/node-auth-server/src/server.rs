//! Status API HTTP Server

use axum::{Router, routing::get};
use nodeauth::shutdown_signal;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers::{self, ListingState};

/// Create and configure the Axum router
pub fn create_router(listing: ListingState) -> Router {
    Router::new()
        .route("/version", get(handlers::version))
        .route("/health", get(handlers::health))
        .route("/nodes", get(handlers::nodes))
        .route("/pods", get(handlers::pods))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(listing)
}

/// Serve the Status API until SIGTERM or Ctrl+C
pub async fn serve(listener: TcpListener, listing: ListingState) -> std::io::Result<()> {
    let app = create_router(listing);

    info!(
        "Status API listening on {}",
        listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
