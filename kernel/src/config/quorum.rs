// Quorum Utilities
//
// Membership queries over a `RaftConfig`: voter counting, majority
// size, role derivation and human-readable diffs.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::{Peer, RaftConfig};
use crate::error::{Error, Result};

/// Role a peer plays from the point of view of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Leader,
    Follower,
    Learner,
    NonParticipant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Leader => "LEADER",
            Role::Follower => "FOLLOWER",
            Role::Learner => "LEARNER",
            Role::NonParticipant => "NON_PARTICIPANT",
        };
        f.write_str(s)
    }
}

pub fn is_member(peer_id: &str, config: &RaftConfig) -> bool {
    config.peers.iter().any(|p| p.id == peer_id)
}

pub fn is_voter(peer_id: &str, config: &RaftConfig) -> bool {
    config
        .peers
        .iter()
        .find(|p| p.id == peer_id)
        .is_some_and(Peer::is_voter)
}

pub fn get_member<'a>(config: &'a RaftConfig, peer_id: &str) -> Result<&'a Peer> {
    config
        .peers
        .iter()
        .find(|p| p.id == peer_id)
        .ok_or_else(|| Error::NotFound(format!("peer {peer_id} not found in consensus config")))
}

/// Drop `peer_id` from the config. Returns whether it was present.
pub fn remove_peer(config: &mut RaftConfig, peer_id: &str) -> bool {
    let before = config.peers.len();
    config.peers.retain(|p| p.id != peer_id);
    config.peers.len() != before
}

pub fn count_voters(config: &RaftConfig) -> usize {
    config.peers.iter().filter(|p| p.is_voter()).count()
}

pub fn majority_size(num_voters: usize) -> Result<usize> {
    if num_voters == 0 {
        return Err(Error::InvalidState(
            "majority of an empty voter set is undefined".into(),
        ));
    }
    Ok(num_voters / 2 + 1)
}

pub fn consensus_role(peer_id: &str, leader_id: Option<&str>, config: &RaftConfig) -> Role {
    if peer_id.is_empty() {
        return Role::NonParticipant;
    }
    match config.peers.iter().find(|p| p.id == peer_id) {
        Some(peer) if peer.is_voter() => {
            if leader_id == Some(peer_id) {
                Role::Leader
            } else {
                Role::Follower
            }
        }
        Some(_) => Role::Learner,
        None => Role::NonParticipant,
    }
}

pub fn peers_string(config: &RaftConfig) -> String {
    config
        .peers
        .iter()
        .map(|p| format!("{} {} ({})", p.member_type, p.id, p.host()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Describe the membership change from `old` to `new`.
pub fn diff_configs(old: &RaftConfig, new: &RaftConfig) -> String {
    let mut pairs: BTreeMap<&str, (Option<&Peer>, Option<&Peer>)> = BTreeMap::new();
    for p in &old.peers {
        pairs.entry(p.id.as_str()).or_default().0 = Some(p);
    }
    for p in &new.peers {
        pairs.entry(p.id.as_str()).or_default().1 = Some(p);
    }

    let mut changes = Vec::new();
    for (id, pair) in pairs {
        match pair {
            (Some(old_peer), None) => changes.push(format!(
                "{} {} ({}) evicted",
                old_peer.member_type,
                id,
                old_peer.host()
            )),
            (None, Some(new_peer)) => changes.push(format!(
                "{} {} ({}) added",
                new_peer.member_type,
                id,
                new_peer.host()
            )),
            (Some(old_peer), Some(new_peer)) if old_peer.member_type != new_peer.member_type => {
                changes.push(format!(
                    "{} ({}) changed from {} to {}",
                    id,
                    old_peer.host(),
                    old_peer.member_type,
                    new_peer.member_type
                ))
            }
            _ => {}
        }
    }

    if changes.is_empty() {
        if old.opid_index != new.opid_index {
            return format!(
                "config opid_index changed from {:?} to {:?}",
                old.opid_index, new.opid_index
            );
        }
        return "no config change".into();
    }
    format!("config changed: {}", changes.join(", "))
}
