//! Agent HTTP Server

use axum::{
    Router,
    routing::{get, post},
};
use nodeauth::shutdown_signal;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers::{self, AppState};

/// Create and configure the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(handlers::version))
        .route("/health", get(handlers::health))
        .route("/encrypt", post(handlers::encrypt))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let app = create_router(state);

    info!(
        "Agent listening on {}",
        listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
