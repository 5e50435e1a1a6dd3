// Consensus Metadata Manager
//
// Owns the mapping from replica id to its consensus metadata record.
// Create, load and delete for one id run under that id's lock, so the
// existence check and the action that depends on it cannot interleave
// with another call for the same id. Different ids never contend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::config::RaftConfig;
use crate::error::{Error, Result};
use crate::meta::{ConsensusMetadata, CreateMode};
use crate::store::{FileMetadataStore, MetadataStore, StoreOptions};

/// Shared handle to a registered record. The registry keeps the record
/// alive until it is deleted.
pub type CmetaHandle = Arc<ConsensusMetadata>;

pub struct ConsensusMetadataManager {
    store: Arc<dyn MetadataStore>,
    peer_id: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
    registry: RwLock<HashMap<String, CmetaHandle>>,
}

impl ConsensusMetadataManager {
    /// `peer_id` is the id of the local node, recorded in every record
    /// this manager hands out.
    pub fn new(store: Arc<dyn MetadataStore>, peer_id: impl Into<String>) -> Self {
        Self {
            store,
            peer_id: peer_id.into(),
            locks: DashMap::new(),
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Manager over a `FileMetadataStore` rooted at `fs_root`.
    pub fn open(
        fs_root: impl AsRef<Path>,
        options: StoreOptions,
        peer_id: impl Into<String>,
    ) -> Result<Self> {
        let store = FileMetadataStore::open(fs_root, options)?;
        Ok(Self::new(Arc::new(store), peer_id))
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id.to_string()).or_default().value())
    }

    /// Create a brand-new record for `id`.
    ///
    /// Fails with `AlreadyExists` if a record is registered in memory or
    /// present in storage; an existing record is never overwritten.
    pub fn create(
        &self,
        id: &str,
        config: RaftConfig,
        initial_term: i64,
        mode: CreateMode,
    ) -> Result<CmetaHandle> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        self.create_locked(id, config, initial_term, mode)
    }

    /// Return the registered record for `id`, reading it from storage on
    /// first use.
    pub fn load(&self, id: &str) -> Result<CmetaHandle> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        self.load_locked(id)
    }

    /// Load `id`, or create it from the given defaults if it does not exist.
    /// The defaults are ignored whenever a record is found.
    pub fn load_or_create(
        &self,
        id: &str,
        config: RaftConfig,
        initial_term: i64,
        mode: CreateMode,
    ) -> Result<CmetaHandle> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();
        match self.load_locked(id) {
            Err(e) if e.is_not_found() => self.create_locked(id, config, initial_term, mode),
            loaded => loaded,
        }
    }

    /// Permanently remove the record for `id` and evict it from the registry.
    ///
    /// Fails with `NotFound` if there is nothing to remove, so a repeated
    /// delete is distinguishable from the one that did the work.
    pub fn delete(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let cached = self.registry.read().get(id).cloned();
        let result = match &cached {
            Some(cmeta) => cmeta.delete_durable(),
            None => self.store.delete(id),
        };
        if cached.is_some() && (result.is_ok() || matches!(&result, Err(e) if e.is_not_found())) {
            self.registry.write().remove(id);
        }
        result?;

        tracing::info!(replica_id = id, "deleted consensus metadata");
        Ok(())
    }

    /// Registered record for `id`, without touching storage.
    pub fn cached(&self, id: &str) -> Option<CmetaHandle> {
        self.registry.read().get(id).cloned()
    }

    /// Ids with a record currently registered, sorted.
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn create_locked(
        &self,
        id: &str,
        config: RaftConfig,
        initial_term: i64,
        mode: CreateMode,
    ) -> Result<CmetaHandle> {
        if self.registry.read().contains_key(id) {
            return Err(Error::AlreadyExists(format!(
                "consensus metadata instance for {id} already exists in memory"
            )));
        }
        if self.store.exists(id)? {
            return Err(Error::AlreadyExists(format!(
                "consensus metadata for {id} already exists in storage"
            )));
        }

        let cmeta = Arc::new(ConsensusMetadata::create(
            Arc::clone(&self.store),
            id,
            &self.peer_id,
            config,
            initial_term,
            mode,
        )?);
        self.registry
            .write()
            .insert(id.to_string(), Arc::clone(&cmeta));

        tracing::info!(
            replica_id = id,
            term = initial_term,
            flushed = mode == CreateMode::FlushOnCreate,
            "created consensus metadata"
        );
        Ok(cmeta)
    }

    fn load_locked(&self, id: &str) -> Result<CmetaHandle> {
        if let Some(cmeta) = self.registry.read().get(id) {
            return Ok(Arc::clone(cmeta));
        }

        let cmeta = Arc::new(ConsensusMetadata::load(
            Arc::clone(&self.store),
            id,
            &self.peer_id,
        )?);
        self.registry
            .write()
            .insert(id.to_string(), Arc::clone(&cmeta));

        tracing::info!(
            replica_id = id,
            term = cmeta.current_term(),
            "loaded consensus metadata"
        );
        Ok(cmeta)
    }
}
