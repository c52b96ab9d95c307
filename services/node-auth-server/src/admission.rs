//! Admission Control Loop
//!
//! One task drives discovery, verification and remediation strictly in sequence,
//! one node per cycle. The controller owns the [`NodeRegistry`] outright; nothing
//! else in the process can reach it.

use nodeauth::{CryptoOperations, PeerAgent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::challenge::{self, CryptoIdentity, VerificationError};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::probe::ReachabilityProbe;
use crate::registry::NodeRegistry;
use crate::remediation;

#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("Orchestrator query failed: {0}")]
    OrchestratorQueryFailed(#[from] OrchestratorError),
}

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    /// Sleep between cycles that found nothing to do
    pub scan_interval: Duration,
    /// Wait before an unverified node gets another attempt
    pub retry_cooldown: Duration,
    pub internal_ip_annotation: String,
    pub control_plane_labels: Vec<String>,
    pub identity: CryptoIdentity,
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    QueryFailed,
    Verified(String),
    Remediated(String),
    RemediationFailed(String),
}

pub struct AdmissionController {
    settings: AdmissionSettings,
    registry: NodeRegistry,
    orchestrator: Arc<dyn Orchestrator>,
    probe: Arc<dyn ReachabilityProbe>,
    agent: Arc<dyn PeerAgent>,
    crypto: Arc<dyn CryptoOperations>,
}

impl AdmissionController {
    pub fn new(
        settings: AdmissionSettings,
        orchestrator: Arc<dyn Orchestrator>,
        probe: Arc<dyn ReachabilityProbe>,
        agent: Arc<dyn PeerAgent>,
        crypto: Arc<dyn CryptoOperations>,
    ) -> Self {
        Self {
            settings,
            registry: NodeRegistry::new(),
            orchestrator,
            probe,
            agent,
            crypto,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Find the first node that needs a verification attempt this cycle.
    ///
    /// Nodes are visited in the order the orchestrator lists them. Control-plane
    /// nodes are trusted on sight. A newly seen node is probed first; if it is
    /// unreachable its cooldown starts when the probe gives up and the scan moves
    /// on. A known unverified node whose cooldown has run out is returned without
    /// probing, so an agent that never answers ends in remediation. The returned
    /// record always carries a pending challenge.
    pub async fn scan_once(&mut self) -> Result<Option<String>, AdmissionError> {
        let nodes = self.orchestrator.list_nodes().await?;

        for node in &nodes {
            if !node.is_ready() {
                continue;
            }
            let name = node.name();

            if let Some(record) = self.registry.get_mut(name) {
                if record.verified
                    || !record.cooldown_elapsed(Instant::now(), self.settings.retry_cooldown)
                {
                    continue;
                }
                record.begin_attempt();
                debug!(node = %name, "Cooldown over, retrying verification");
                return Ok(Some(name.to_string()));
            }

            let Some(ip) = node.internal_ip(&self.settings.internal_ip_annotation) else {
                warn!(node = %name, "Ready node has no internal IP, skipping");
                continue;
            };

            let record = self.registry.admit(name, ip);
            if node.is_control_plane(&self.settings.control_plane_labels) {
                record.mark_exempt();
                info!(node = %name, "Control-plane node admitted without challenge");
                continue;
            }
            info!(node = %name, ip = %ip, "Discovered new node");
            record.begin_attempt();

            if self.probe.probe(ip).await {
                return Ok(Some(name.to_string()));
            }

            debug!(node = %name, ip = %ip, "Node unreachable, deferring");
            if let Some(record) = self.registry.get_mut(name) {
                record.abandon_attempt(Instant::now());
            }
        }

        Ok(None)
    }

    /// Scan once and, if a node qualified, verify it and remediate on failure.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let name = match self.scan_once().await {
            Ok(Some(name)) => name,
            Ok(None) => return CycleOutcome::Idle,
            Err(e) => {
                error!("{}", e);
                return CycleOutcome::QueryFailed;
            }
        };

        let Some(record) = self.registry.get_mut(&name) else {
            return CycleOutcome::Idle;
        };

        let result = challenge::verify(
            record,
            self.agent.as_ref(),
            self.crypto.as_ref(),
            &self.settings.identity,
        )
        .await;

        let reason = match result {
            Ok(()) => {
                info!(node = %name, "Node verified");
                return CycleOutcome::Verified(name);
            }
            Err(VerificationError::NoPendingChallenge) => {
                error!(node = %name, "Scan returned a node without a pending challenge");
                return CycleOutcome::Idle;
            }
            Err(e) => e,
        };

        warn!(node = %name, error = %reason, "Verification failed");
        match remediation::remediate(self.orchestrator.as_ref(), &name, &reason.to_string()).await
        {
            Ok(()) => {
                self.registry.evict(&name);
                CycleOutcome::Remediated(name)
            }
            Err(_) => CycleOutcome::RemediationFailed(name),
        }
    }

    /// Run cycles forever. Sleeps only when a cycle found nothing to do.
    pub async fn run(mut self) {
        info!(
            scan_interval = ?self.settings.scan_interval,
            retry_cooldown = ?self.settings.retry_cooldown,
            "Admission control loop started"
        );

        loop {
            match self.run_cycle().await {
                CycleOutcome::Idle | CycleOutcome::QueryFailed => {
                    tokio::time::sleep(self.settings.scan_interval).await;
                }
                outcome => {
                    debug!(
                        ?outcome,
                        known = self.registry.len(),
                        verified = self.registry.verified_count(),
                        "Cycle complete"
                    );
                }
            }
        }
    }
}
