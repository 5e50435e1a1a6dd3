// Raftmeta Kernel
//
// Durable consensus state for replicated tablets: the log position
// order, Raft configurations, and the per-replica metadata record with
// its manager.

pub mod config;
pub mod error;
pub mod invariants;
pub mod manager;
pub mod meta;
pub mod opid;
pub mod store;

pub use error::{Error, Result};
pub use manager::{CmetaHandle, ConsensusMetadataManager};
pub use meta::{ConsensusMetadata, ConsensusState, CreateMode};
pub use opid::OpId;
