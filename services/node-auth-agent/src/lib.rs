//! Node Authentication Agent
//!
//! Runs on every node that wants to join the cluster and answers the admission
//! server's challenge: `/version` proves the agent is alive, `/encrypt` seals the
//! challenge with the node's provisioned key through the node-local crypto
//! service. The private half of that key pair lives only with the server's
//! crypto service.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod handlers;
pub mod server;

use handlers::AppState;
use nodeauth::{CryptoClient, NodeAuthError, register_until_ready};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Client error: {0}")]
    Client(#[from] NodeAuthError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub crypto_url: String,
    pub crypto_client_name: String,
    /// Public key the challenge is encrypted with
    pub encrypt_key_name: String,
    pub bootstrap_retry: Duration,
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: &str| {
            var(key, default)
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ServiceError::Config(format!("{} must be a valid number: {}", key, e)))
        };

        let port = var("PORT", "8301")
            .trim()
            .parse()
            .map_err(|e| ServiceError::Config(format!("PORT must be a valid number: {}", e)))?;

        Ok(Self {
            port,
            crypto_url: var("CRYPTO_URL", "http://127.0.0.1:8300"),
            crypto_client_name: var("CRYPTO_CLIENT_NAME", "NodeAuthAgent"),
            encrypt_key_name: var("ENCRYPT_KEY_NAME", "MyPubKey"),
            bootstrap_retry: secs("BOOTSTRAP_RETRY_SECS", "10")?,
            request_timeout: secs("REQUEST_TIMEOUT_SECS", "10")?,
        })
    }
}

/// Run the agent: register with the crypto service, then serve challenges.
pub async fn run(config: Config) -> Result<(), ServiceError> {
    info!("Starting node authentication agent");
    info!("Crypto service: {}", config.crypto_url);
    info!("Encryption key: {}", config.encrypt_key_name);

    let crypto = Arc::new(CryptoClient::new(&config.crypto_url, config.request_timeout)?);
    register_until_ready(
        crypto.as_ref(),
        &config.crypto_client_name,
        config.bootstrap_retry,
    )
    .await;

    let state = AppState {
        crypto,
        client_name: config.crypto_client_name,
        key_name: config.encrypt_key_name,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    server::serve(listener, state).await?;

    info!("Node authentication agent stopped");
    Ok(())
}
