//! Fakes for the collaborator traits.
//!
//! The fake agent "encrypts" by base64-encoding and the fake crypto service
//! "decrypts" by base64-decoding, so an honest agent round-trips the challenge.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use nodeauth::{CryptoOperations, NodeAuthError, PeerAgent};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::orchestrator::{ClusterNode, Orchestrator, OrchestratorError};
use crate::probe::ReachabilityProbe;

fn refused(status: u16) -> NodeAuthError {
    NodeAuthError::UnexpectedStatus {
        status,
        body: String::new(),
    }
}

/// Lets simulated time pass; under a paused clock the runtime jumps straight ahead.
async fn take(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn transport() -> NodeAuthError {
    NodeAuthError::InvalidResponse("connection refused".to_string())
}

pub fn node(name: &str, ip: &str, ready: bool, control_plane: bool) -> ClusterNode {
    let mut labels = serde_json::Map::new();
    if control_plane {
        labels.insert(
            "node-role.kubernetes.io/master".to_string(),
            serde_json::Value::String("true".to_string()),
        );
    }
    let ready_status = if ready { "True" } else { "False" };
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "labels": labels,
            "annotations": {"k3s.io/internal-ip": ip},
        },
        "status": {
            "conditions": [{"type": "Ready", "status": ready_status}],
        },
    }))
    .unwrap()
}

// ==================== Agent ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Honest,
    Down,
    EncryptFails,
    WrongKey,
    Garbage,
}

pub struct FakeAgent {
    pub mode: Mutex<AgentMode>,
    pub calls: Mutex<Vec<String>>,
    pub latency: Mutex<Duration>,
}

impl FakeAgent {
    pub fn new(mode: AgentMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_mode(&self, mode: AgentMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Time each call takes before it answers.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn mode(&self) -> AgentMode {
        *self.mode.lock().unwrap()
    }
}

#[async_trait]
impl PeerAgent for FakeAgent {
    async fn version(&self, ip: &str) -> Result<String, NodeAuthError> {
        self.calls.lock().unwrap().push(format!("version {}", ip));
        take(self.latency()).await;
        match self.mode() {
            AgentMode::Down => Err(refused(503)),
            _ => Ok("1.0".to_string()),
        }
    }

    async fn encrypt(&self, ip: &str, challenge: &str) -> Result<String, NodeAuthError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("encrypt {} {}", ip, challenge));
        take(self.latency()).await;
        match self.mode() {
            AgentMode::Honest => Ok(BASE64.encode(challenge)),
            AgentMode::Down => Err(transport()),
            AgentMode::EncryptFails => Err(refused(500)),
            AgentMode::WrongKey => {
                let mut flipped = challenge.as_bytes().to_vec();
                flipped[0] ^= 0x01;
                Ok(BASE64.encode(flipped))
            }
            AgentMode::Garbage => Ok("not base64!".to_string()),
        }
    }
}

// ==================== Crypto service ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    Healthy,
    RegisterFails,
    DecryptRejects,
    Unavailable,
}

pub struct FakeCrypto {
    pub mode: CryptoMode,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCrypto {
    pub fn new(mode: CryptoMode) -> Self {
        Self {
            mode,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CryptoOperations for FakeCrypto {
    async fn register_client(&self, name: &str) -> Result<(), NodeAuthError> {
        self.calls.lock().unwrap().push(format!("register {}", name));
        match self.mode {
            CryptoMode::RegisterFails => Err(refused(500)),
            CryptoMode::Unavailable => Err(transport()),
            _ => Ok(()),
        }
    }

    async fn encrypt(&self, _: &str, _: &str, message: &str) -> Result<String, NodeAuthError> {
        Ok(BASE64.encode(message))
    }

    async fn decrypt(
        &self,
        name: &str,
        key_name: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, NodeAuthError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("decrypt {} {}", name, key_name));
        match self.mode {
            CryptoMode::DecryptRejects => Err(refused(500)),
            CryptoMode::Unavailable => Err(transport()),
            _ => BASE64
                .decode(ciphertext)
                .map_err(|e| NodeAuthError::InvalidResponse(e.to_string())),
        }
    }
}

// ==================== Orchestrator ====================

#[derive(Default)]
pub struct FakeOrchestrator {
    pub nodes: Mutex<Vec<ClusterNode>>,
    pub list_fails: Mutex<bool>,
    /// Mutation that fails: "cordon", "drain" or "delete"
    pub failing_step: Mutex<Option<&'static str>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeOrchestrator {
    pub fn with_nodes(nodes: Vec<ClusterNode>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Default::default()
        }
    }

    pub fn fail_at(&self, step: &'static str) {
        *self.failing_step.lock().unwrap() = Some(step);
    }

    pub fn set_nodes(&self, nodes: Vec<ClusterNode>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    /// Mutations only, in call order.
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() != "list")
            .cloned()
            .collect()
    }

    fn mutate(&self, step: &'static str, node: &str) -> Result<(), OrchestratorError> {
        self.calls.lock().unwrap().push(format!("{} {}", step, node));
        if *self.failing_step.lock().unwrap() == Some(step) {
            return Err(OrchestratorError::CommandFailed {
                command: format!("kubectl {} {}", step, node),
                status: "exit status: 1".to_string(),
                stderr: "error: forbidden".to_string(),
            });
        }
        if step == "delete" {
            self.nodes.lock().unwrap().retain(|n| n.name() != node);
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, OrchestratorError> {
        self.calls.lock().unwrap().push("list".to_string());
        if *self.list_fails.lock().unwrap() {
            return Err(OrchestratorError::Malformed(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn cordon(&self, node: &str) -> Result<(), OrchestratorError> {
        self.mutate("cordon", node)
    }

    async fn drain(&self, node: &str) -> Result<(), OrchestratorError> {
        self.mutate("drain", node)
    }

    async fn delete_node(&self, node: &str) -> Result<(), OrchestratorError> {
        self.mutate("delete", node)
    }
}

// ==================== Probe ====================

#[derive(Default)]
pub struct FakeProbe {
    pub unreachable: Mutex<HashSet<String>>,
    pub probed: Mutex<Vec<String>>,
    pub latency: Mutex<Duration>,
}

impl FakeProbe {
    /// Time each probe takes before it reports.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_unreachable(&self, ip: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(ip.to_string());
        } else {
            set.remove(ip);
        }
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, ip: &str) -> bool {
        self.probed.lock().unwrap().push(ip.to_string());
        let latency = *self.latency.lock().unwrap();
        take(latency).await;
        !self.unreachable.lock().unwrap().contains(ip)
    }
}
