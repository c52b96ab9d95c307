//! Node admission client errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeAuthError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The crypto service answered with its `{"Code": n}` failure body.
    #[error("Crypto service failed with status {status}, code {code}")]
    ServiceFailure { status: u16, code: i32 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NodeAuthError {
    /// True when the remote end answered, as opposed to a transport failure or timeout.
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            NodeAuthError::UnexpectedStatus { .. } | NodeAuthError::ServiceFailure { .. }
        )
    }
}
