//! Reachability probe
//!
//! Orchestrator readiness can lag behind real network reachability, so a failed
//! probe only defers a node; it is never a verification failure.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, ip: &str) -> bool;
}

/// ICMP echo probe using the system `ping`.
pub struct PingProbe {
    count: u32,
    wait: Duration,
}

impl PingProbe {
    pub fn new(count: u32, wait: Duration) -> Self {
        Self { count, wait }
    }

    /// Upper bound on a single probe: every echo waits at most `wait`, plus a second of slack.
    fn deadline(&self) -> Duration {
        self.wait * self.count.max(1) + Duration::from_secs(1)
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn probe(&self, ip: &str) -> bool {
        let mut cmd = Command::new("ping");
        cmd.arg(ip)
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(self.wait.as_secs().max(1).to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.deadline(), cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Failed to run ping");
                false
            }
            Err(_) => {
                debug!(ip = %ip, "Ping timed out");
                false
            }
        }
    }
}
