//! Status API Handlers
//!
//! Read-only views of the cluster. Handlers only ever see a [`ClusterListing`],
//! never the admission registry.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use nodeauth::{API_VERSION, ErrorResponse};
use std::sync::Arc;
use tracing::error;

use crate::orchestrator::{ClusterListing, OrchestratorError, Resource};

pub type ListingState = Arc<dyn ClusterListing>;

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: msg.into() }),
        )
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        error!("Orchestrator listing failed: {}", e);
        ApiError::internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

// ==================== Handlers ====================

pub async fn version() -> &'static str {
    API_VERSION
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Raw node listing, passed through untouched
pub async fn nodes(State(listing): State<ListingState>) -> Result<Response, ApiError> {
    passthrough(listing.as_ref(), Resource::Nodes).await
}

/// Raw pod listing, passed through untouched
pub async fn pods(State(listing): State<ListingState>) -> Result<Response, ApiError> {
    passthrough(listing.as_ref(), Resource::Pods).await
}

async fn passthrough(
    listing: &dyn ClusterListing,
    resource: Resource,
) -> Result<Response, ApiError> {
    let body = listing.raw_listing(resource).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
