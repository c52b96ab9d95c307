//! Node Authentication Server
//!
//! Admits a machine into the cluster only after it proves possession of a
//! provisioned private key, and expels it when it cannot.
//!
//! # Architecture
//!
//! Two independent tasks share nothing but the orchestrator adapter:
//! - **Admission control loop**: discovery, reachability probe, challenge-response
//!   verification and remediation, one node per cycle. Owns the node registry.
//! - **Status API**: read-only HTTP pass-through of the orchestrator's node and
//!   pod listings.
//!
//! # Verification flow
//!
//! 1. A ready, non-control-plane node is discovered and given a random challenge
//! 2. Its agent answers `/version`, then encrypts the challenge with the node's key
//! 3. The crypto service decrypts the ciphertext with the matching private key
//! 4. The plaintext must equal the challenge, otherwise the node is cordoned,
//!    drained and deleted

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod admission;
pub mod challenge;
pub mod handlers;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod remediation;
pub mod server;

#[cfg(test)]
mod testing;

use admission::{AdmissionController, AdmissionSettings};
use challenge::CryptoIdentity;
use nodeauth::{AgentClient, CryptoClient, NodeAuthError, register_until_ready};
use orchestrator::{
    DEFAULT_CONTROL_PLANE_LABELS, DEFAULT_INTERNAL_IP_ANNOTATION, KubectlOrchestrator,
};
use probe::PingProbe;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Client error: {0}")]
    Client(#[from] NodeAuthError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Status API listen port
    pub port: u16,
    /// Crypto-operations service base URL
    pub crypto_url: String,
    /// Client identity this server registers with the crypto service
    pub crypto_client_name: String,
    /// Key pair whose private half opens node ciphertexts
    pub decrypt_key_name: String,
    /// Port every peer agent listens on
    pub agent_port: u16,
    pub kubectl: String,
    pub kubeconfig: Option<String>,
    pub internal_ip_annotation: String,
    pub control_plane_labels: Vec<String>,
    pub scan_interval: Duration,
    pub retry_cooldown: Duration,
    pub bootstrap_retry: Duration,
    /// Per-request timeout for agent and crypto service calls
    pub request_timeout: Duration,
    /// Per-invocation timeout for kubectl
    pub command_timeout: Duration,
    pub ping_count: u32,
    pub ping_wait: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: &str| {
            parse_var::<u64>(key, &var(key, default)).map(Duration::from_secs)
        };

        let control_plane_labels = match lookup("CONTROL_PLANE_LABELS") {
            Some(raw) => split_list(&raw),
            None => DEFAULT_CONTROL_PLANE_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        if control_plane_labels.is_empty() {
            return Err(ServiceError::Config(
                "CONTROL_PLANE_LABELS must name at least one label".to_string(),
            ));
        }

        Ok(Self {
            port: parse_var("PORT", &var("PORT", "8301"))?,
            crypto_url: var("CRYPTO_URL", "http://127.0.0.1:8300"),
            crypto_client_name: var("CRYPTO_CLIENT_NAME", "NodeAuthServer"),
            decrypt_key_name: var("DECRYPT_KEY_NAME", "MyEncKey"),
            agent_port: parse_var("AGENT_PORT", &var("AGENT_PORT", "8301"))?,
            kubectl: var("KUBECTL", "kubectl"),
            kubeconfig: lookup("KUBECONFIG").filter(|s| !s.is_empty()),
            internal_ip_annotation: var("INTERNAL_IP_ANNOTATION", DEFAULT_INTERNAL_IP_ANNOTATION),
            control_plane_labels,
            scan_interval: secs("SCAN_INTERVAL_SECS", "30")?,
            retry_cooldown: secs("RETRY_COOLDOWN_SECS", "300")?,
            bootstrap_retry: secs("BOOTSTRAP_RETRY_SECS", "10")?,
            request_timeout: secs("REQUEST_TIMEOUT_SECS", "10")?,
            command_timeout: secs("COMMAND_TIMEOUT_SECS", "120")?,
            ping_count: parse_var("PING_COUNT", &var("PING_COUNT", "4"))?,
            ping_wait: secs("PING_WAIT_SECS", "5")?,
        })
    }

    fn admission_settings(&self) -> AdmissionSettings {
        AdmissionSettings {
            scan_interval: self.scan_interval,
            retry_cooldown: self.retry_cooldown,
            internal_ip_annotation: self.internal_ip_annotation.clone(),
            control_plane_labels: self.control_plane_labels.clone(),
            identity: CryptoIdentity {
                client_name: self.crypto_client_name.clone(),
                key_name: self.decrypt_key_name.clone(),
            },
        }
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, ServiceError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ServiceError::Config(format!("{} must be a valid number: {}", key, e)))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Run the server: register with the crypto service, then run the admission
/// loop and the Status API side by side.
pub async fn run(config: Config) -> Result<(), ServiceError> {
    info!("Starting node authentication server");
    info!("Crypto service: {}", config.crypto_url);
    info!("Agent port: {}", config.agent_port);
    info!("Control-plane labels: {:?}", config.control_plane_labels);

    let crypto = Arc::new(CryptoClient::new(&config.crypto_url, config.request_timeout)?);
    let agent = Arc::new(AgentClient::new(config.agent_port, config.request_timeout)?);
    let kubectl = Arc::new(KubectlOrchestrator::new(
        config.kubectl.clone(),
        config.kubeconfig.clone(),
        config.command_timeout,
    ));
    let probe = Arc::new(PingProbe::new(config.ping_count, config.ping_wait));

    // Nothing runs until the crypto service knows who we are
    register_until_ready(
        crypto.as_ref(),
        &config.crypto_client_name,
        config.bootstrap_retry,
    )
    .await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let controller = AdmissionController::new(
        config.admission_settings(),
        kubectl.clone(),
        probe,
        agent,
        crypto,
    );
    let control_loop = tokio::spawn(controller.run());

    let result = server::serve(listener, kubectl).await;
    control_loop.abort();

    if let Err(e) = result {
        error!("Status API error: {}", e);
        return Err(e.into());
    }
    info!("Node authentication server stopped");
    Ok(())
}
