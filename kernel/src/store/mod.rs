// Consensus Metadata Storage Abstraction
//
// Defines the durability contract for per-replica metadata records.
// Implementations may persist to local disk or keep bytes in memory
// for tests.

use crate::error::Result;

pub mod file;
pub mod memory;
pub mod options;

pub use file::FileMetadataStore;
pub use memory::InMemoryMetadataStore;
pub use options::StoreOptions;

/// Storage backend for consensus metadata records, keyed by replica id.
///
/// Properties required from implementations:
/// - One record per replica id
/// - Writes are atomic: a reader sees the old bytes or the new bytes,
///   never a mix
/// - `create_new` never overwrites an existing record
///
/// Serializing writers for the same id is the caller's job.
pub trait MetadataStore: Send + Sync {
    /// Persist a record that must not exist yet.
    ///
    /// Fails with `AlreadyExists` if a record for `id` is present.
    fn create_new(&self, id: &str, bytes: &[u8]) -> Result<()>;

    /// Read the full record. Fails with `NotFound` if absent.
    fn read(&self, id: &str) -> Result<Vec<u8>>;

    /// Atomically replace (or create) the record for `id`.
    fn replace(&self, id: &str, bytes: &[u8]) -> Result<()>;

    /// Remove the record. Fails with `NotFound` if absent.
    fn delete(&self, id: &str) -> Result<()>;

    fn exists(&self, id: &str) -> Result<bool>;
}
