//! Orchestrator Adapter
//!
//! Typed view of the cluster's node listing plus the three mutations remediation
//! needs. The production implementation shells out to `kubectl`; everything else
//! in the crate only sees the [`Orchestrator`] and [`ClusterListing`] traits.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_INTERNAL_IP_ANNOTATION: &str = "k3s.io/internal-ip";
pub const DEFAULT_CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("Malformed orchestrator response: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ==================== Node listing schema ====================

/// `kubectl get nodes -o json`. A listing without `items` is malformed.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeList {
    pub items: Vec<ClusterNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterNode {
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeMetadata {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

impl ClusterNode {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The `Ready` condition reports `"True"`. A node without one is not ready.
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .find(|c| c.kind == "Ready")
            .is_some_and(|c| c.status == "True")
    }

    /// Internal address from `annotation`, falling back to the `InternalIP` status address.
    pub fn internal_ip(&self, annotation: &str) -> Option<&str> {
        self.metadata
            .annotations
            .get(annotation)
            .map(String::as_str)
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                self.status
                    .addresses
                    .iter()
                    .find(|a| a.kind == "InternalIP")
                    .map(|a| a.address.as_str())
            })
    }

    /// Any of `labels` present with value `"true"` or empty.
    pub fn is_control_plane(&self, labels: &[String]) -> bool {
        labels.iter().any(|label| {
            self.metadata
                .labels
                .get(label)
                .is_some_and(|value| value.is_empty() || value == "true")
        })
    }
}

pub fn parse_node_list(raw: &[u8]) -> Result<Vec<ClusterNode>, OrchestratorError> {
    let list: NodeList = serde_json::from_slice(raw)?;
    Ok(list.items)
}

// ==================== Traits ====================

/// Cluster inspection and the mutations used by remediation.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, OrchestratorError>;

    /// Mark the node unschedulable.
    async fn cordon(&self, node: &str) -> Result<(), OrchestratorError>;

    /// Evict every workload except daemon-managed ones, forcing unmanaged pods out.
    async fn drain(&self, node: &str) -> Result<(), OrchestratorError>;

    /// Remove the node object from the cluster.
    async fn delete_node(&self, node: &str) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Nodes,
    Pods,
}

impl Resource {
    fn kind(self) -> &'static str {
        match self {
            Resource::Nodes => "nodes",
            Resource::Pods => "pods",
        }
    }
}

/// Read-only pass-through of orchestrator listings.
#[async_trait]
pub trait ClusterListing: Send + Sync {
    /// The orchestrator's JSON listing, byte for byte.
    async fn raw_listing(&self, resource: Resource) -> Result<String, OrchestratorError>;
}

// ==================== kubectl ====================

pub struct KubectlOrchestrator {
    kubectl: String,
    kubeconfig: Option<String>,
    timeout: Duration,
}

impl KubectlOrchestrator {
    pub fn new(kubectl: impl Into<String>, kubeconfig: Option<String>, timeout: Duration) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig,
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, OrchestratorError> {
        let command = format!("{} {}", self.kubectl, args.join(" "));
        debug!("Running {}", command);

        let mut cmd = Command::new(&self.kubectl);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(OrchestratorError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
            Ok(Err(source)) => return Err(OrchestratorError::Spawn { command, source }),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(OrchestratorError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Orchestrator for KubectlOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, OrchestratorError> {
        let raw = self.run(&["get", "nodes", "-o", "json"]).await?;
        parse_node_list(&raw)
    }

    async fn cordon(&self, node: &str) -> Result<(), OrchestratorError> {
        self.run(&["cordon", node]).await.map(|_| ())
    }

    async fn drain(&self, node: &str) -> Result<(), OrchestratorError> {
        self.run(&[
            "drain",
            node,
            "--ignore-daemonsets",
            "--force",
            "--delete-emptydir-data",
        ])
        .await
        .map(|_| ())
    }

    async fn delete_node(&self, node: &str) -> Result<(), OrchestratorError> {
        self.run(&["delete", "node", node]).await.map(|_| ())
    }
}

#[async_trait]
impl ClusterListing for KubectlOrchestrator {
    async fn raw_listing(&self, resource: Resource) -> Result<String, OrchestratorError> {
        let raw = self.run(&["get", resource.kind(), "-o", "json"]).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}
