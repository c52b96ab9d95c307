//! Crypto-client bootstrap
//!
//! Neither service can do useful work until its client identity is registered
//! with the crypto-operations service, so start-up blocks here with a fixed
//! backoff instead of exiting.

use std::time::Duration;
use tracing::{info, warn};

use crate::crypto_client::CryptoOperations;

/// Register `name` with the crypto service, retrying every `retry_interval` until it succeeds.
///
/// Returns the number of attempts it took.
pub async fn register_until_ready(
    crypto: &dyn CryptoOperations,
    name: &str,
    retry_interval: Duration,
) -> u32 {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match crypto.register_client(name).await {
            Ok(()) => {
                info!(client = %name, attempts, "Crypto client registered");
                return attempts;
            }
            Err(e) => {
                warn!(
                    client = %name,
                    attempts,
                    error = %e,
                    "Crypto service not ready, retrying in {:?}",
                    retry_interval
                );
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
