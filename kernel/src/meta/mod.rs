// Consensus Metadata Record
//
// In-memory authority for one replica's durable consensus state:
// current term, vote, committed and pending configuration. Mutations
// stay in memory until the owner calls `flush`.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::quorum::{self, Role};
use crate::config::RaftConfig;
use crate::error::{Error, Result};
use crate::invariants::verify_raft_config;
use crate::store::MetadataStore;

pub mod codec;

pub use codec::PersistedState;

/// Whether `create` persists the new record before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    FlushOnCreate,
    NoFlushOnCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Replace whatever record is on disk.
    Overwrite,
    /// Fail with `AlreadyExists` if a record is on disk.
    NoOverwrite,
}

/// Which configuration a membership query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Committed,
    Pending,
    /// Pending if one is in flight, committed otherwise.
    Active,
}

/// Point-in-time view of a replica's consensus state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsensusState {
    pub current_term: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<String>,
    pub committed_config: RaftConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_config: Option<RaftConfig>,
}

impl ConsensusState {
    /// A known leader must be a voter in the committed or pending config.
    pub fn verify(&self) -> Result<()> {
        if self.current_term < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative term {}",
                self.current_term
            )));
        }
        verify_raft_config(&self.committed_config)?;
        if let Some(pending) = &self.pending_config {
            verify_raft_config(pending)?;
        }
        if let Some(leader) = self.leader_id.as_deref() {
            let in_pending = self
                .pending_config
                .as_ref()
                .is_some_and(|p| quorum::is_voter(leader, p));
            if !quorum::is_voter(leader, &self.committed_config) && !in_pending {
                return Err(Error::InvalidArgument(format!(
                    "leader {leader} is not a voter in the committed or pending config"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    state: PersistedState,
    leader_id: Option<String>,
    active_role: Role,
    /// Bumped on every mutation.
    version: u64,
    flushed_version: u64,
    on_disk: bool,
    deleted: bool,
    flush_count: u64,
    on_disk_size: u64,
}

impl Inner {
    fn active_config(&self) -> &RaftConfig {
        self.state
            .pending_config
            .as_ref()
            .unwrap_or(&self.state.committed_config)
    }

    fn touch(&mut self, peer_id: &str) {
        self.version += 1;
        self.active_role =
            quorum::consensus_role(peer_id, self.leader_id.as_deref(), self.active_config());
    }

    fn config(&self, kind: ConfigKind) -> Result<&RaftConfig> {
        match kind {
            ConfigKind::Committed => Ok(&self.state.committed_config),
            ConfigKind::Active => Ok(self.active_config()),
            ConfigKind::Pending => self.state.pending_config.as_ref().ok_or_else(|| {
                Error::InvalidState("no pending config is in flight".into())
            }),
        }
    }
}

/// A replica's consensus metadata.
///
/// Mutators are meant for a single owner (the consensus engine); `flush`
/// may run concurrently with them and always persists a consistent copy.
pub struct ConsensusMetadata {
    replica_id: String,
    peer_id: String,
    store: Arc<dyn MetadataStore>,
    inner: RwLock<Inner>,
    flush_lock: Mutex<()>,
}

impl std::fmt::Debug for ConsensusMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusMetadata")
            .field("replica_id", &self.replica_id)
            .field("peer_id", &self.peer_id)
            .field("inner", &*self.inner.read())
            .finish()
    }
}

impl ConsensusMetadata {
    fn from_state(
        store: Arc<dyn MetadataStore>,
        replica_id: &str,
        peer_id: &str,
        state: PersistedState,
        on_disk_size: Option<u64>,
    ) -> Self {
        let active_role = quorum::consensus_role(
            peer_id,
            None,
            state.pending_config.as_ref().unwrap_or(&state.committed_config),
        );
        let on_disk = on_disk_size.is_some();
        Self {
            replica_id: replica_id.to_string(),
            peer_id: peer_id.to_string(),
            store,
            inner: RwLock::new(Inner {
                state,
                leader_id: None,
                active_role,
                version: if on_disk { 0 } else { 1 },
                flushed_version: 0,
                on_disk,
                deleted: false,
                flush_count: 0,
                on_disk_size: on_disk_size.unwrap_or(0),
            }),
            flush_lock: Mutex::new(()),
        }
    }

    /// Build a brand-new record, persisting it first when asked to.
    ///
    /// The first write of a record never overwrites an existing one.
    pub(crate) fn create(
        store: Arc<dyn MetadataStore>,
        replica_id: &str,
        peer_id: &str,
        config: RaftConfig,
        initial_term: i64,
        mode: CreateMode,
    ) -> Result<Self> {
        if initial_term < 0 {
            return Err(Error::InvalidArgument(format!(
                "initial term {initial_term} for {replica_id} is negative"
            )));
        }
        let state = PersistedState {
            current_term: initial_term,
            voted_for: None,
            committed_config: config,
            pending_config: None,
        };
        let cmeta = Self::from_state(store, replica_id, peer_id, state, None);
        if mode == CreateMode::FlushOnCreate {
            cmeta.flush_with_mode(FlushMode::NoOverwrite)?;
        }
        Ok(cmeta)
    }

    /// Read and validate the durable record for `replica_id`.
    pub(crate) fn load(
        store: Arc<dyn MetadataStore>,
        replica_id: &str,
        peer_id: &str,
    ) -> Result<Self> {
        let bytes = store.read(replica_id)?;
        let state = codec::decode(&bytes).map_err(|e| match e {
            Error::Corruption(msg) => {
                Error::Corruption(format!("consensus metadata for {replica_id}: {msg}"))
            }
            other => other,
        })?;
        Ok(Self::from_state(
            store,
            replica_id,
            peer_id,
            state,
            Some(bytes.len() as u64),
        ))
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Id of the local peer this record belongs to.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn current_term(&self) -> i64 {
        self.inner.read().state.current_term
    }

    /// Advance the term. Moving it backwards is a fatal contract violation;
    /// any advance forgets the vote cast in the previous term.
    pub fn set_current_term(&self, term: i64) -> Result<()> {
        let mut inner = self.inner.write();
        let current = inner.state.current_term;
        if term < current {
            tracing::error!(
                replica_id = %self.replica_id,
                current,
                requested = term,
                "refusing to move consensus term backwards"
            );
            return Err(Error::InvalidState(format!(
                "{}: term may not move backwards from {current} to {term}",
                self.replica_id
            )));
        }
        if term > current {
            inner.state.current_term = term;
            inner.state.voted_for = None;
            inner.touch(&self.peer_id);
        }
        Ok(())
    }

    pub fn voted_for(&self) -> Option<String> {
        self.inner.read().state.voted_for.clone()
    }

    pub fn has_voted_for(&self) -> bool {
        self.inner.read().state.voted_for.is_some()
    }

    /// Record this replica's vote for the current term. Repeating the same
    /// vote is a no-op; a different candidate in the same term is fatal.
    pub fn set_voted_for(&self, peer_id: impl Into<String>) -> Result<()> {
        let peer_id = peer_id.into();
        let mut inner = self.inner.write();
        match inner.state.voted_for.clone() {
            Some(existing) if existing == peer_id => Ok(()),
            Some(existing) => {
                let term = inner.state.current_term;
                tracing::error!(
                    replica_id = %self.replica_id,
                    term,
                    existing = %existing,
                    requested = %peer_id,
                    "refusing second vote in the same term"
                );
                Err(Error::InvalidState(format!(
                    "{}: already voted for {existing} in term {term}, cannot vote for {peer_id}",
                    self.replica_id
                )))
            }
            None => {
                inner.state.voted_for = Some(peer_id);
                inner.touch(&self.peer_id);
                Ok(())
            }
        }
    }

    pub fn clear_voted_for(&self) {
        let mut inner = self.inner.write();
        if inner.state.voted_for.take().is_some() {
            inner.touch(&self.peer_id);
        }
    }

    pub fn committed_config(&self) -> RaftConfig {
        self.inner.read().state.committed_config.clone()
    }

    pub fn set_committed_config(&self, config: RaftConfig) {
        let mut inner = self.inner.write();
        inner.state.committed_config = config;
        inner.touch(&self.peer_id);
    }

    pub fn committed_opid_index(&self) -> Option<i64> {
        self.inner.read().state.committed_config.opid_index
    }

    pub fn pending_config(&self) -> Option<RaftConfig> {
        self.inner.read().state.pending_config.clone()
    }

    pub fn has_pending_config(&self) -> bool {
        self.inner.read().state.pending_config.is_some()
    }

    pub fn set_pending_config(&self, config: RaftConfig) {
        let mut inner = self.inner.write();
        inner.state.pending_config = Some(config);
        inner.touch(&self.peer_id);
    }

    pub fn clear_pending_config(&self) {
        let mut inner = self.inner.write();
        if inner.state.pending_config.take().is_some() {
            inner.touch(&self.peer_id);
        }
    }

    pub fn active_config(&self) -> RaftConfig {
        self.inner.read().active_config().clone()
    }

    pub fn leader_id(&self) -> Option<String> {
        self.inner.read().leader_id.clone()
    }

    /// Leader knowledge is kept in memory only and is never flushed.
    pub fn set_leader_id(&self, leader_id: Option<String>) {
        let mut inner = self.inner.write();
        inner.leader_id = leader_id;
        inner.active_role =
            quorum::consensus_role(&self.peer_id, inner.leader_id.as_deref(), inner.active_config());
    }

    pub fn active_role(&self) -> Role {
        self.inner.read().active_role
    }

    pub fn is_voter_in_config(&self, peer_id: &str, kind: ConfigKind) -> Result<bool> {
        let inner = self.inner.read();
        Ok(quorum::is_voter(peer_id, inner.config(kind)?))
    }

    pub fn is_member_in_config(&self, peer_id: &str, kind: ConfigKind) -> Result<bool> {
        let inner = self.inner.read();
        Ok(quorum::is_member(peer_id, inner.config(kind)?))
    }

    pub fn count_voters_in_config(&self, kind: ConfigKind) -> Result<usize> {
        let inner = self.inner.read();
        Ok(quorum::count_voters(inner.config(kind)?))
    }

    pub fn to_consensus_state(&self) -> ConsensusState {
        let inner = self.inner.read();
        ConsensusState {
            current_term: inner.state.current_term,
            leader_id: inner.leader_id.clone(),
            committed_config: inner.state.committed_config.clone(),
            pending_config: inner.state.pending_config.clone(),
        }
    }

    /// Adopt a committed state learned from elsewhere (e.g. a tablet copy):
    /// take its term if newer, its committed config, and drop any pending
    /// config and leader.
    pub fn merge_committed_consensus_state(&self, cstate: &ConsensusState) -> Result<()> {
        if cstate.current_term < 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot merge negative term {}",
                cstate.current_term
            )));
        }
        let mut inner = self.inner.write();
        if cstate.current_term > inner.state.current_term {
            inner.state.current_term = cstate.current_term;
            inner.state.voted_for = None;
        }
        inner.leader_id = None;
        inner.state.committed_config = cstate.committed_config.clone();
        inner.state.pending_config = None;
        inner.touch(&self.peer_id);
        Ok(())
    }

    /// Persist the current state, replacing the previous record.
    pub fn flush(&self) -> Result<()> {
        self.flush_with_mode(FlushMode::Overwrite)
    }

    /// Persist a snapshot of the current state.
    ///
    /// On failure the in-memory state is untouched and stays dirty.
    pub fn flush_with_mode(&self, mode: FlushMode) -> Result<()> {
        let _flushing = self.flush_lock.lock();

        let (snapshot, version, on_disk) = {
            let inner = self.inner.read();
            if inner.deleted {
                return Err(Error::NotFound(format!(
                    "consensus metadata for {} was deleted",
                    self.replica_id
                )));
            }
            (inner.state.clone(), inner.version, inner.on_disk)
        };

        verify_raft_config(&snapshot.committed_config).map_err(|v| {
            tracing::warn!(replica_id = %self.replica_id, "refusing to flush: {v}");
            v
        })?;
        if let Some(pending) = &snapshot.pending_config {
            verify_raft_config(pending)?;
        }

        let bytes = codec::encode(&snapshot)?;
        let mode = if on_disk { mode } else { FlushMode::NoOverwrite };
        match mode {
            FlushMode::Overwrite => self.store.replace(&self.replica_id, &bytes)?,
            FlushMode::NoOverwrite => self.store.create_new(&self.replica_id, &bytes)?,
        }

        let mut inner = self.inner.write();
        inner.flushed_version = version;
        inner.on_disk = true;
        inner.flush_count += 1;
        inner.on_disk_size = bytes.len() as u64;
        tracing::debug!(
            replica_id = %self.replica_id,
            term = snapshot.current_term,
            bytes = bytes.len(),
            "flushed consensus metadata"
        );
        Ok(())
    }

    /// Whether there are mutations not yet persisted.
    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.read();
        inner.version != inner.flushed_version
    }

    pub fn flush_count(&self) -> u64 {
        self.inner.read().flush_count
    }

    /// Size of the last record written or read, in bytes.
    pub fn on_disk_size(&self) -> u64 {
        self.inner.read().on_disk_size
    }

    /// Remove the durable record and refuse any later flush.
    ///
    /// A record that was never flushed has nothing to remove.
    pub(crate) fn delete_durable(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let on_disk = self.inner.read().on_disk;

        let removed = self.store.delete(&self.replica_id);
        // Only a record that is gone from storage stops accepting flushes.
        if matches!(&removed, Ok(()) | Err(Error::NotFound(_))) {
            self.inner.write().deleted = true;
        }
        match removed {
            Err(e) if e.is_not_found() && !on_disk => Ok(()),
            other => other,
        }
    }
}
