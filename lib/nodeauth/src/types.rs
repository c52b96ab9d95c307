//! Wire types shared by the admission services and their collaborators

use serde::{Deserialize, Serialize};

/// Body returned by every `/version` endpoint in the system.
pub const API_VERSION: &str = "1.0";

/// Request body accepted by every crypto-operations endpoint.
///
/// The service reads PascalCase keys; fields an operation does not need are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CryptoRequest {
    /// Logical client identity registered with the service
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,
}

impl CryptoRequest {
    pub fn client(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn key(name: &str, key_name: &str) -> Self {
        Self {
            name: name.to_string(),
            key_name: Some(key_name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_sign(mut self, sign: impl Into<String>) -> Self {
        self.sign = Some(sign.into());
        self
    }
}

/// One entry of the crypto service's key listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ProviderID")]
    pub provider_id: u32,
}

/// Failure body returned by the crypto service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CryptoErrorResponse {
    pub code: i32,
}

/// Error body returned by the admission services' own HTTP APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}
