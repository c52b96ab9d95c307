//! Node admission client library
//!
//! Wire types and HTTP clients shared by the node admission services: the
//! crypto-operations service client, the peer agent client, and the start-up
//! registration loop both services run before doing any work.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod agent_client;
pub mod bootstrap;
pub mod crypto_client;
pub mod error;
pub mod server;
pub mod types;

pub use agent_client::{AgentClient, PeerAgent};
pub use bootstrap::register_until_ready;
pub use crypto_client::{CryptoClient, CryptoOperations};
pub use error::NodeAuthError;
pub use server::{ShutdownReason, shutdown_signal, wait_for_shutdown};
pub use types::{API_VERSION, CryptoErrorResponse, CryptoRequest, ErrorResponse, KeyInfo};
