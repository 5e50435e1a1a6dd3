// In-Memory Metadata Store
//
// Volatile `MetadataStore` for tests. Writes can be made to fail to
// exercise flush error paths.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::MetadataStore;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write or delete fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn check_writable(&self, id: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::io(
                format!("write consensus metadata for {id}"),
                io::Error::new(io::ErrorKind::Other, "injected write failure"),
            ));
        }
        Ok(())
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn create_new(&self, id: &str, bytes: &[u8]) -> Result<()> {
        self.check_writable(id)?;
        let mut records = self.records.lock();
        if records.contains_key(id) {
            return Err(Error::AlreadyExists(format!(
                "consensus metadata for {id} already exists in store"
            )));
        }
        records.insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Vec<u8>> {
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no consensus metadata for {id}")))
    }

    fn replace(&self, id: &str, bytes: &[u8]) -> Result<()> {
        self.check_writable(id)?;
        self.records.lock().insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.check_writable(id)?;
        match self.records.lock().remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("no consensus metadata for {id}"))),
        }
    }

    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.records.lock().contains_key(id))
    }
}
