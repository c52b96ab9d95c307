//! Crypto Service Client
//!
//! HTTP client for the crypto-operations service. The service keeps key pairs
//! on behalf of named client identities; every request names the identity and,
//! where relevant, the key pair it operates on.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::NodeAuthError;
use crate::types::{CryptoErrorResponse, CryptoRequest, KeyInfo};

/// Crypto operations the admission loop and the peer agent depend on.
#[async_trait]
pub trait CryptoOperations: Send + Sync {
    /// Register a logical client identity. Safe to repeat.
    async fn register_client(&self, name: &str) -> Result<(), NodeAuthError>;

    /// Encrypt `message` with the named key, returning base64 ciphertext.
    async fn encrypt(&self, name: &str, key_name: &str, message: &str)
    -> Result<String, NodeAuthError>;

    /// Decrypt base64 `ciphertext` with the named key pair, returning the raw plaintext.
    async fn decrypt(
        &self,
        name: &str,
        key_name: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, NodeAuthError>;
}

/// HTTP client for the crypto-operations service.
pub struct CryptoClient {
    client: Client,
    base_url: String,
    registered: AtomicBool,
}

impl CryptoClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NodeAuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            registered: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a client registration has succeeded since this client was built.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        request: &impl Serialize,
    ) -> Result<Response, NodeAuthError> {
        let url = self.url(path);
        debug!("{} {}", method, url);
        let response = self
            .client
            .request(method, &url)
            .json(request)
            .send()
            .await?;
        expect_ok(response).await
    }

    async fn send_for_text(
        &self,
        method: reqwest::Method,
        path: &str,
        request: &CryptoRequest,
    ) -> Result<String, NodeAuthError> {
        let response = self.send(method, path, request).await?;
        Ok(response.text().await?)
    }

    pub async fn remove_client(&self, name: &str) -> Result<(), NodeAuthError> {
        self.send(reqwest::Method::DELETE, "/client", &CryptoRequest::client(name))
            .await?;
        self.registered.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub async fn list_keys(&self, name: &str) -> Result<Vec<KeyInfo>, NodeAuthError> {
        let response = self
            .send(reqwest::Method::GET, "/keys", &CryptoRequest::client(name))
            .await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| NodeAuthError::InvalidResponse(format!("key list: {}", e)))
    }

    pub async fn delete_all_keys(&self, name: &str) -> Result<(), NodeAuthError> {
        self.send(reqwest::Method::DELETE, "/keys", &CryptoRequest::client(name))
            .await?;
        Ok(())
    }

    pub async fn create_signing_key(&self, name: &str, key_name: &str) -> Result<(), NodeAuthError> {
        self.send(
            reqwest::Method::POST,
            "/keysign",
            &CryptoRequest::key(name, key_name),
        )
        .await?;
        Ok(())
    }

    pub async fn create_encryption_key(
        &self,
        name: &str,
        key_name: &str,
    ) -> Result<(), NodeAuthError> {
        self.send(
            reqwest::Method::POST,
            "/keyenc",
            &CryptoRequest::key(name, key_name),
        )
        .await?;
        Ok(())
    }

    /// Export a public key as an `ssh-rsa <base64> <name>_<key>` line.
    pub async fn export_public_key(
        &self,
        name: &str,
        key_name: &str,
    ) -> Result<String, NodeAuthError> {
        self.send_for_text(reqwest::Method::GET, "/key", &CryptoRequest::key(name, key_name))
            .await
    }

    /// Import a public key previously exported from another crypto service.
    pub async fn import_public_key(
        &self,
        name: &str,
        key_name: &str,
        ssh_line: &str,
    ) -> Result<(), NodeAuthError> {
        let request = CryptoRequest::key(name, key_name).with_message(ssh_line);
        self.send(reqwest::Method::POST, "/key", &request).await?;
        Ok(())
    }

    pub async fn delete_key(&self, name: &str, key_name: &str) -> Result<(), NodeAuthError> {
        self.send(
            reqwest::Method::DELETE,
            "/key",
            &CryptoRequest::key(name, key_name),
        )
        .await?;
        Ok(())
    }

    /// Sign the SHA-256 hash of `message`, returning a base64 signature.
    pub async fn sign(
        &self,
        name: &str,
        key_name: &str,
        message: &str,
    ) -> Result<String, NodeAuthError> {
        let request = CryptoRequest::key(name, key_name).with_message(message);
        self.send_for_text(reqwest::Method::POST, "/sign", &request)
            .await
    }

    /// Returns `Ok(false)` when the service rejects the signature.
    pub async fn verify(
        &self,
        name: &str,
        key_name: &str,
        message: &str,
        signature: &str,
    ) -> Result<bool, NodeAuthError> {
        let request = CryptoRequest::key(name, key_name)
            .with_message(message)
            .with_sign(signature);
        match self.send(reqwest::Method::POST, "/verify", &request).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status() => {
                debug!("Signature rejected: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CryptoOperations for CryptoClient {
    async fn register_client(&self, name: &str) -> Result<(), NodeAuthError> {
        self.send(reqwest::Method::POST, "/client", &CryptoRequest::client(name))
            .await?;
        self.registered.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn encrypt(
        &self,
        name: &str,
        key_name: &str,
        message: &str,
    ) -> Result<String, NodeAuthError> {
        let request = CryptoRequest::key(name, key_name).with_message(message);
        self.send_for_text(reqwest::Method::POST, "/encrypt", &request)
            .await
    }

    async fn decrypt(
        &self,
        name: &str,
        key_name: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, NodeAuthError> {
        let request = CryptoRequest::key(name, key_name).with_message(ciphertext);
        let response = self
            .send(reqwest::Method::POST, "/decrypt", &request)
            .await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Anything but `200 OK` is a failure. A `{"Code": n}` body is decoded, any
/// other body is kept for the log.
pub(crate) async fn expect_ok(response: Response) -> Result<Response, NodeAuthError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<CryptoErrorResponse>(&body) {
        Ok(failure) => Err(NodeAuthError::ServiceFailure {
            status: status.as_u16(),
            code: failure.code,
        }),
        Err(_) => Err(NodeAuthError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        }),
    }
}
