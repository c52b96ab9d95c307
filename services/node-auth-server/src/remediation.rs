//! Remediation
//!
//! Expels a node that failed verification: cordon, drain, delete. Each step runs
//! only if the previous one succeeded and nothing is rolled back, so a failure
//! leaves the node half-remediated in the orchestrator.

use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationStep {
    Cordon,
    Drain,
    Delete,
}

impl RemediationStep {
    pub const SEQUENCE: [RemediationStep; 3] = [
        RemediationStep::Cordon,
        RemediationStep::Drain,
        RemediationStep::Delete,
    ];

    async fn apply(
        self,
        orchestrator: &dyn Orchestrator,
        node: &str,
    ) -> Result<(), OrchestratorError> {
        match self {
            RemediationStep::Cordon => orchestrator.cordon(node).await,
            RemediationStep::Drain => orchestrator.drain(node).await,
            RemediationStep::Delete => orchestrator.delete_node(node).await,
        }
    }
}

impl fmt::Display for RemediationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationStep::Cordon => write!(f, "cordon"),
            RemediationStep::Drain => write!(f, "drain"),
            RemediationStep::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RemediationError {
    #[error("Remediation of {node} stopped at {step}: {source}")]
    StepFailed {
        node: String,
        step: RemediationStep,
        source: OrchestratorError,
    },
}

impl RemediationError {
    pub fn step(&self) -> RemediationStep {
        match self {
            RemediationError::StepFailed { step, .. } => *step,
        }
    }
}

/// Run the full remediation sequence against `node`.
pub async fn remediate(
    orchestrator: &dyn Orchestrator,
    node: &str,
    reason: &str,
) -> Result<(), RemediationError> {
    warn!(node = %node, reason = %reason, "Remediating node");

    for step in RemediationStep::SEQUENCE {
        if let Err(source) = step.apply(orchestrator, node).await {
            error!(node = %node, step = %step, error = %source, "Remediation step failed");
            return Err(RemediationError::StepFailed {
                node: node.to_string(),
                step,
                source,
            });
        }
        info!(node = %node, step = %step, "Remediation step complete");
    }

    info!(node = %node, "Node removed from cluster");
    Ok(())
}
