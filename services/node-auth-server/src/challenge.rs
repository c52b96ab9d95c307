//! Challenge-response verification
//!
//! A node proves it holds the private half of a key pair provisioned out of band:
//! its agent encrypts our challenge, the crypto service decrypts the ciphertext
//! with the matching private key, and the plaintext must equal the challenge
//! byte for byte. The private key never leaves the node.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use nodeauth::{CryptoOperations, NodeAuthError, PeerAgent};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::registry::NodeRecord;

/// Identity and key pair this server decrypts challenges with.
#[derive(Debug, Clone)]
pub struct CryptoIdentity {
    pub client_name: String,
    pub key_name: String,
}

/// Every variant ends the attempt and leads to remediation.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Agent unreachable: {0}")]
    AgentUnreachable(String),
    #[error("Agent failed to encrypt challenge: {0}")]
    AgentEncryptFailed(String),
    #[error("Crypto service unavailable: {0}")]
    CryptoServiceUnavailable(String),
    #[error("Challenge mismatch: {0}")]
    DecryptMismatch(String),
    #[error("No challenge pending for node")]
    NoPendingChallenge,
}

/// Run one verification attempt against `record`.
///
/// On success the record is marked verified. On failure the pending challenge
/// is dropped and the retry cooldown starts at the moment the failing step returned.
pub async fn verify(
    record: &mut NodeRecord,
    agent: &dyn PeerAgent,
    crypto: &dyn CryptoOperations,
    identity: &CryptoIdentity,
) -> Result<(), VerificationError> {
    let result = exchange(record, agent, crypto, identity).await;
    match result {
        Ok(()) => record.mark_verified(),
        Err(_) => record.abandon_attempt(Instant::now()),
    }
    result
}

async fn exchange(
    record: &NodeRecord,
    agent: &dyn PeerAgent,
    crypto: &dyn CryptoOperations,
    identity: &CryptoIdentity,
) -> Result<(), VerificationError> {
    let challenge = record
        .challenge()
        .ok_or(VerificationError::NoPendingChallenge)?;

    let version = agent
        .version(&record.ip)
        .await
        .map_err(|e| VerificationError::AgentUnreachable(e.to_string()))?;
    debug!(node = %record.name, version = %version, "Agent is live");

    let ciphertext = agent
        .encrypt(&record.ip, challenge.as_str())
        .await
        .map_err(|e| VerificationError::AgentEncryptFailed(e.to_string()))?;
    check_ciphertext(&ciphertext)?;

    crypto
        .register_client(&identity.client_name)
        .await
        .map_err(|e| VerificationError::CryptoServiceUnavailable(e.to_string()))?;

    let plaintext = crypto
        .decrypt(&identity.client_name, &identity.key_name, &ciphertext)
        .await
        .map_err(decrypt_error)?;

    if bool::from(plaintext.as_slice().ct_eq(challenge.as_bytes())) {
        Ok(())
    } else {
        Err(VerificationError::DecryptMismatch(
            "plaintext differs from challenge".to_string(),
        ))
    }
}

/// The agent's body is forwarded untouched; it only has to be well-formed base64.
fn check_ciphertext(ciphertext: &str) -> Result<(), VerificationError> {
    if ciphertext.is_empty() {
        return Err(VerificationError::AgentEncryptFailed(
            "empty ciphertext".to_string(),
        ));
    }
    BASE64
        .decode(ciphertext)
        .map(|_| ())
        .map_err(|e| VerificationError::DecryptMismatch(format!("ciphertext is not base64: {}", e)))
}

/// A service that answers but refuses the ciphertext could not decrypt it with our key.
fn decrypt_error(e: NodeAuthError) -> VerificationError {
    if e.is_status() {
        VerificationError::DecryptMismatch(format!("decrypt rejected: {}", e))
    } else {
        VerificationError::CryptoServiceUnavailable(e.to_string())
    }
}
