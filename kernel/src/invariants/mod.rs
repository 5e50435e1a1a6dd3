// Invariant Framework
//
// Invariants are pure rules that every Raft configuration must satisfy
// before it is written to, or accepted from, stable storage.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::RaftConfig;

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all configuration invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, config: &RaftConfig) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no rules registered.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// The rule set applied to every persisted configuration.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(HasPeers);
        engine.register(PeerIdsPresent);
        engine.register(UniquePeerIds);
        engine.register(AddressesWhenReplicated);
        engine.register(OpIdIndexNonNegative);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, config: &RaftConfig) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(config) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, thiserror::Error)]
#[error("invariant `{invariant}` violated: {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub reason: String,
}

/// Evaluate the standard rule set, built once per process.
pub fn verify_raft_config(config: &RaftConfig) -> Result<(), InvariantViolation> {
    static STANDARD: OnceLock<InvariantEngine> = OnceLock::new();
    STANDARD.get_or_init(InvariantEngine::standard).evaluate(config)
}

pub struct HasPeers;

impl Invariant for HasPeers {
    fn name(&self) -> &'static str {
        "has-peers"
    }

    fn validate(&self, config: &RaftConfig) -> InvariantResult {
        if config.peers.is_empty() {
            InvariantResult::Fail("config must have at least one peer".into())
        } else {
            InvariantResult::Pass
        }
    }
}

pub struct PeerIdsPresent;

impl Invariant for PeerIdsPresent {
    fn name(&self) -> &'static str {
        "peer-ids-present"
    }

    fn validate(&self, config: &RaftConfig) -> InvariantResult {
        match config.peers.iter().position(|p| p.id.is_empty()) {
            Some(pos) => InvariantResult::Fail(format!("peer #{pos} has an empty id")),
            None => InvariantResult::Pass,
        }
    }
}

pub struct UniquePeerIds;

impl Invariant for UniquePeerIds {
    fn name(&self) -> &'static str {
        "unique-peer-ids"
    }

    fn validate(&self, config: &RaftConfig) -> InvariantResult {
        let mut seen = HashSet::new();
        for peer in &config.peers {
            if !seen.insert(peer.id.as_str()) {
                return InvariantResult::Fail(format!("found multiple peers with id {}", peer.id));
            }
        }
        InvariantResult::Pass
    }
}

/// A lone bootstrap peer may omit its address; anything replicated may not.
pub struct AddressesWhenReplicated;

impl Invariant for AddressesWhenReplicated {
    fn name(&self) -> &'static str {
        "addresses-when-replicated"
    }

    fn validate(&self, config: &RaftConfig) -> InvariantResult {
        if config.peers.len() < 2 {
            return InvariantResult::Pass;
        }
        match config.peers.iter().find(|p| p.last_known_addr.is_none()) {
            Some(peer) => InvariantResult::Fail(format!("peer {} has no address", peer.id)),
            None => InvariantResult::Pass,
        }
    }
}

pub struct OpIdIndexNonNegative;

impl Invariant for OpIdIndexNonNegative {
    fn name(&self) -> &'static str {
        "opid-index-non-negative"
    }

    fn validate(&self, config: &RaftConfig) -> InvariantResult {
        match config.opid_index {
            Some(index) if index < 0 => {
                InvariantResult::Fail(format!("opid_index {index} is negative"))
            }
            _ => InvariantResult::Pass,
        }
    }
}
