//! End-to-end admission cycles over HTTP.
//!
//! The agent and the crypto service are wiremock servers speaking the real wire
//! formats; only the orchestrator and the ICMP probe are replaced in-process.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use node_auth_server::admission::{AdmissionController, AdmissionSettings, CycleOutcome};
use node_auth_server::challenge::CryptoIdentity;
use node_auth_server::orchestrator::{
    ClusterNode, DEFAULT_INTERNAL_IP_ANNOTATION, Orchestrator, OrchestratorError, parse_node_list,
};
use node_auth_server::probe::ReachabilityProbe;
use nodeauth::{AgentClient, CryptoClient, CryptoRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const NODE_IP: &str = "127.0.0.1";

// ==================== In-process collaborators ====================

struct ListedNodes {
    nodes: Mutex<Vec<ClusterNode>>,
    mutations: Mutex<Vec<String>>,
}

impl ListedNodes {
    fn new(raw: &str) -> Self {
        Self {
            nodes: Mutex::new(parse_node_list(raw.as_bytes()).unwrap()),
            mutations: Mutex::new(Vec::new()),
        }
    }

    fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Orchestrator for ListedNodes {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>, OrchestratorError> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn cordon(&self, node: &str) -> Result<(), OrchestratorError> {
        self.mutations.lock().unwrap().push(format!("cordon {}", node));
        Ok(())
    }

    async fn drain(&self, node: &str) -> Result<(), OrchestratorError> {
        self.mutations.lock().unwrap().push(format!("drain {}", node));
        Ok(())
    }

    async fn delete_node(&self, node: &str) -> Result<(), OrchestratorError> {
        self.mutations.lock().unwrap().push(format!("delete {}", node));
        self.nodes.lock().unwrap().retain(|n| n.name() != node);
        Ok(())
    }
}

struct AlwaysReachable;

#[async_trait]
impl ReachabilityProbe for AlwaysReachable {
    async fn probe(&self, _: &str) -> bool {
        true
    }
}

// ==================== Wire-level responders ====================

/// Agent `/encrypt`: "encrypts" by base64-encoding the posted challenge.
struct EncodingAgent {
    tamper: bool,
}

impl Respond for EncodingAgent {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut body = request.body.clone();
        if self.tamper {
            body[0] ^= 0x20;
        }
        ResponseTemplate::new(200).set_body_string(BASE64.encode(body))
    }
}

/// Crypto service `/decrypt`: base64-decodes `Message` and returns the raw bytes.
struct DecodingCrypto;

impl Respond for DecodingCrypto {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let request: CryptoRequest = serde_json::from_slice(&request.body).unwrap();
        match BASE64.decode(request.message.unwrap_or_default()) {
            Ok(plaintext) => ResponseTemplate::new(200).set_body_bytes(plaintext),
            Err(_) => ResponseTemplate::new(500).set_body_json(serde_json::json!({"Code": 1})),
        }
    }
}

async fn agent_server(tamper: bool) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/version"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.0"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/encrypt"))
        .respond_with(EncodingAgent { tamper })
        .mount(&server)
        .await;
    server
}

async fn crypto_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client"))
        .and(body_json(serde_json::json!({"Name": "NodeAuthServer"})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/decrypt"))
        .respond_with(DecodingCrypto)
        .mount(&server)
        .await;
    server
}

fn cluster() -> String {
    format!(
        r#"{{
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {{
                    "metadata": {{
                        "name": "master-0",
                        "labels": {{"node-role.kubernetes.io/master": "true"}},
                        "annotations": {{"k3s.io/internal-ip": "10.255.255.1"}}
                    }},
                    "status": {{"conditions": [{{"type": "Ready", "status": "True"}}]}}
                }},
                {{
                    "metadata": {{
                        "name": "worker-1",
                        "annotations": {{"k3s.io/internal-ip": "{ip}"}}
                    }},
                    "status": {{"conditions": [{{"type": "Ready", "status": "True"}}]}}
                }},
                {{
                    "metadata": {{"name": "worker-2"}},
                    "status": {{"conditions": [{{"type": "Ready", "status": "False"}}]}}
                }}
            ]
        }}"#,
        ip = NODE_IP
    )
}

fn controller(
    orchestrator: Arc<ListedNodes>,
    agent: &MockServer,
    crypto: &MockServer,
) -> AdmissionController {
    let settings = AdmissionSettings {
        scan_interval: Duration::from_secs(30),
        retry_cooldown: Duration::from_secs(300),
        internal_ip_annotation: DEFAULT_INTERNAL_IP_ANNOTATION.to_string(),
        control_plane_labels: vec!["node-role.kubernetes.io/master".to_string()],
        identity: CryptoIdentity {
            client_name: "NodeAuthServer".to_string(),
            key_name: "MyEncKey".to_string(),
        },
    };
    AdmissionController::new(
        settings,
        orchestrator,
        Arc::new(AlwaysReachable),
        Arc::new(AgentClient::new(agent.address().port(), Duration::from_secs(5)).unwrap()),
        Arc::new(CryptoClient::new(&crypto.uri(), Duration::from_secs(5)).unwrap()),
    )
}

// ==================== Scenarios ====================

#[tokio::test]
async fn test_honest_node_is_admitted() {
    let agent = agent_server(false).await;
    let crypto = crypto_server().await;
    let orchestrator = Arc::new(ListedNodes::new(&cluster()));
    let mut controller = controller(orchestrator.clone(), &agent, &crypto);

    let outcome = controller.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Verified("worker-1".to_string()));
    assert!(controller.registry().get("master-0").unwrap().verified);
    assert!(controller.registry().get("worker-1").unwrap().verified);
    assert!(controller.registry().get("worker-2").is_none());
    assert!(orchestrator.mutations().is_empty());

    // The challenge travelled as a 32 character alphanumeric body
    let requests = agent.received_requests().await.unwrap();
    let encrypt = requests
        .iter()
        .find(|r| r.url.path() == "/encrypt")
        .unwrap();
    assert_eq!(encrypt.body.len(), 32);
    assert!(encrypt.body.iter().all(u8::is_ascii_alphanumeric));

    // The decrypt request names our identity and key, and carries the agent's ciphertext verbatim
    let requests = crypto.received_requests().await.unwrap();
    let decrypt = requests
        .iter()
        .find(|r| r.url.path() == "/decrypt")
        .unwrap();
    let sent: CryptoRequest = serde_json::from_slice(&decrypt.body).unwrap();
    assert_eq!(sent.name, "NodeAuthServer");
    assert_eq!(sent.key_name.as_deref(), Some("MyEncKey"));
    assert_eq!(sent.message, Some(BASE64.encode(&encrypt.body)));

    assert_eq!(controller.run_cycle().await, CycleOutcome::Idle);
}

#[tokio::test]
async fn test_tampered_ciphertext_is_remediated() {
    let agent = agent_server(true).await;
    let crypto = crypto_server().await;
    let orchestrator = Arc::new(ListedNodes::new(&cluster()));
    let mut controller = controller(orchestrator.clone(), &agent, &crypto);

    let outcome = controller.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Remediated("worker-1".to_string()));
    assert_eq!(
        orchestrator.mutations(),
        vec!["cordon worker-1", "drain worker-1", "delete worker-1"]
    );
    assert!(controller.registry().get("worker-1").is_none());
}

#[tokio::test]
async fn test_dead_agent_is_remediated() {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/version"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&agent)
        .await;
    let crypto = crypto_server().await;
    let orchestrator = Arc::new(ListedNodes::new(&cluster()));
    let mut controller = controller(orchestrator.clone(), &agent, &crypto);

    let outcome = controller.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Remediated("worker-1".to_string()));
    let crypto_requests = crypto.received_requests().await.unwrap();
    assert!(crypto_requests.is_empty());
}

#[tokio::test]
async fn test_decrypt_refusal_is_remediated() {
    let agent = agent_server(false).await;
    let crypto = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&crypto)
        .await;
    Mock::given(method("POST"))
        .and(path("/decrypt"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"Code": 9})))
        .mount(&crypto)
        .await;
    let orchestrator = Arc::new(ListedNodes::new(&cluster()));
    let mut controller = controller(orchestrator.clone(), &agent, &crypto);

    let outcome = controller.run_cycle().await;

    assert_eq!(outcome, CycleOutcome::Remediated("worker-1".to_string()));
    assert_eq!(orchestrator.mutations().len(), 3);
}
