// Raft Configuration
//
// Immutable membership snapshot handed to the metadata layer by the
// cluster-membership collaborator. Compared structurally only.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod quorum;

/// Whether a peer counts towards the majority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    Voter,
    NonVoter,
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberType::Voter => f.write_str("VOTER"),
            MemberType::NonVoter => f.write_str("NON_VOTER"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub member_type: MemberType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_addr: Option<HostPort>,
}

impl Peer {
    pub fn voter(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            member_type: MemberType::Voter,
            last_known_addr: None,
        }
    }

    pub fn non_voter(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            member_type: MemberType::NonVoter,
            last_known_addr: None,
        }
    }

    pub fn with_addr(mut self, host: impl Into<String>, port: u16) -> Self {
        self.last_known_addr = Some(HostPort {
            host: host.into(),
            port,
        });
        self
    }

    pub fn is_voter(&self) -> bool {
        self.member_type == MemberType::Voter
    }

    /// Host for diagnostics, empty when the address is unknown.
    pub(crate) fn host(&self) -> &str {
        self.last_known_addr
            .as_ref()
            .map(|a| a.host.as_str())
            .unwrap_or("")
    }
}

/// Cluster membership plus the log index at which it was adopted.
///
/// `opid_index` stays unset for a configuration that never went through
/// the log, such as the bootstrap configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opid_index: Option<i64>,
    pub peers: Vec<Peer>,
}

impl RaftConfig {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self {
            opid_index: None,
            peers,
        }
    }

    pub fn with_opid_index(mut self, opid_index: i64) -> Self {
        self.opid_index = Some(opid_index);
        self
    }
}
