//! Node Registry
//!
//! In-memory verification state for every node the control loop has seen.
//! Owned by the control loop alone; nothing else holds a reference, so there
//! is no locking.

use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub const CHALLENGE_LEN: usize = 32;

/// Secret nonce a node must round-trip through its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    /// Fresh challenge from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CHALLENGE_LEN)
            .map(char::from)
            .collect();
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Challenge(<redacted>)")
    }
}

#[cfg(test)]
impl From<&str> for Challenge {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub name: String,
    pub ip: String,
    pub verified: bool,
    challenge: Option<Challenge>,
    /// Start of the current retry cooldown. `None` means eligible now.
    next_check_at: Option<Instant>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            verified: false,
            challenge: None,
            next_check_at: None,
        }
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn next_check_at(&self) -> Option<Instant> {
        self.next_check_at
    }

    /// Start a verification attempt. A pending challenge is kept, never replaced.
    pub fn begin_attempt(&mut self) -> &Challenge {
        self.challenge.get_or_insert_with(Challenge::generate)
    }

    /// Give up on the current attempt and start the retry cooldown at `now`.
    pub fn abandon_attempt(&mut self, now: Instant) {
        self.challenge = None;
        self.next_check_at = Some(now);
    }

    pub fn mark_verified(&mut self) {
        self.verified = true;
        self.challenge = None;
        self.next_check_at = None;
    }

    /// Control-plane nodes are trusted without a challenge.
    pub fn mark_exempt(&mut self) {
        self.mark_verified();
    }

    /// Strictly more than `cooldown` has passed since the cooldown started.
    pub fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        match self.next_check_at {
            None => true,
            Some(started) => now.saturating_duration_since(started) > cooldown,
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeRecord>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(name)
    }

    /// Insert a record for a newly seen node. An existing record is returned untouched.
    pub fn admit(&mut self, name: &str, ip: &str) -> &mut NodeRecord {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| NodeRecord::new(name, ip))
    }

    pub fn evict(&mut self, name: &str) -> Option<NodeRecord> {
        self.nodes.remove(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn verified_count(&self) -> usize {
        self.nodes.values().filter(|n| n.verified).count()
    }
}
