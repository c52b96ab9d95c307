//! Agent REST API Handlers

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nodeauth::{API_VERSION, CryptoOperations, ErrorResponse, NodeAuthError};
use std::sync::Arc;
use tracing::{debug, error};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub crypto: Arc<dyn CryptoOperations>,
    /// Client identity registered with the node-local crypto service
    pub client_name: String,
    /// Key the challenge is encrypted with
    pub key_name: String,
}

// ==================== Error Handling ====================

pub struct ApiError(pub StatusCode, pub Json<ErrorResponse>);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { error: msg.into() }),
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError(
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: msg.into() }),
        )
    }
}

impl From<NodeAuthError> for ApiError {
    fn from(e: NodeAuthError) -> Self {
        error!("Crypto service call failed: {}", e);
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

/// Encrypt the posted challenge with this node's key. Returns base64 ciphertext.
pub async fn encrypt(State(state): State<AppState>, body: String) -> Result<String, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Challenge cannot be empty"));
    }
    debug!(bytes = body.len(), "Encrypting challenge");

    let ciphertext = state
        .crypto
        .encrypt(&state.client_name, &state.key_name, &body)
        .await?;
    Ok(ciphertext)
}
