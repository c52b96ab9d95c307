//! Peer Agent Client
//!
//! Talks to the agent running on a candidate node. Every call names the node's
//! internal address; the agent port is fixed per deployment.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::crypto_client::expect_ok;
use crate::error::NodeAuthError;

/// Operations the admission loop performs against a candidate node's agent.
#[async_trait]
pub trait PeerAgent: Send + Sync {
    /// Liveness check. Returns the version string the agent reports.
    async fn version(&self, ip: &str) -> Result<String, NodeAuthError>;

    /// Ask the agent to encrypt `challenge` with its provisioned key.
    /// Returns the response body verbatim (expected to be base64 ciphertext).
    async fn encrypt(&self, ip: &str, challenge: &str) -> Result<String, NodeAuthError>;
}

/// HTTP client for peer agents.
pub struct AgentClient {
    client: Client,
    port: u16,
}

impl AgentClient {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, NodeAuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, port })
    }

    fn base_url(&self, ip: &str) -> String {
        if ip.contains(':') {
            format!("http://[{}]:{}", ip, self.port)
        } else {
            format!("http://{}:{}", ip, self.port)
        }
    }
}

#[async_trait]
impl PeerAgent for AgentClient {
    async fn version(&self, ip: &str) -> Result<String, NodeAuthError> {
        let url = format!("{}/version", self.base_url(ip));
        let response = self.client.get(&url).send().await?;
        let response = expect_ok(response).await?;
        Ok(response.text().await?)
    }

    async fn encrypt(&self, ip: &str, challenge: &str) -> Result<String, NodeAuthError> {
        let url = format!("{}/encrypt", self.base_url(ip));
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(challenge.to_string())
            .send()
            .await?;
        let response = expect_ok(response).await?;
        Ok(response.text().await?)
    }
}
