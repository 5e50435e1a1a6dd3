// File-Backed Metadata Store
//
// One file per replica under `<fs_root>/<dir_name>/<replica id>`.
// Every write goes to a uniquely named temporary file first, so a crash
// never leaves a partially written record under the final name.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::{MetadataStore, StoreOptions};
use crate::error::{Error, Result};

/// Marks temporary files; replica ids may not contain it.
const TMP_INFIX: &str = ".tmp.";

#[derive(Debug)]
pub struct FileMetadataStore {
    dir: PathBuf,
    options: StoreOptions,
}

impl FileMetadataStore {
    /// Open (creating if needed) the metadata directory under `fs_root`
    /// and remove temporary files left behind by an interrupted write.
    ///
    /// Assumes no other process is writing to the directory: a concurrent
    /// writer's temporary file is removed too and its write then fails.
    pub fn open(fs_root: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let dir = fs_root.as_ref().join(&options.dir_name);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("create directory {}", dir.display()), e))?;

        let store = Self { dir, options };
        store.remove_stale_tmp_files()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic location of the record for `id`.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(id))
    }

    fn write_tmp(&self, id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let tmp = self
            .dir
            .join(format!("{id}{TMP_INFIX}{}", Uuid::new_v4().simple()));

        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                if self.options.fsync {
                    file.sync_all()?;
                }
                Ok(())
            });

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(format!("write {}", tmp.display()), e));
        }
        Ok(tmp)
    }

    fn sync_dir(&self) -> Result<()> {
        if !self.options.fsync {
            return Ok(());
        }
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| Error::io(format!("sync directory {}", self.dir.display()), e))
    }

    fn remove_stale_tmp_files(&self) -> Result<()> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| Error::io(format!("list {}", self.dir.display()), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| Error::io(format!("list {}", self.dir.display()), e))?;
            let name = entry.file_name();
            if !name.to_string_lossy().contains(TMP_INFIX) {
                continue;
            }
            let path = entry.path();
            tracing::warn!(path = %path.display(), "removing stale temporary consensus metadata file");
            fs::remove_file(&path)
                .map_err(|e| Error::io(format!("remove {}", path.display()), e))?;
        }
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.contains(TMP_INFIX);
    if bad {
        return Err(Error::InvalidArgument(format!(
            "replica id {id:?} cannot be used as a file name"
        )));
    }
    Ok(())
}

fn not_found_or_io(id: &str, path: &Path, action: &str, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(format!("no consensus metadata for {id} at {}", path.display()))
    } else {
        Error::io(format!("{action} {}", path.display()), e)
    }
}

impl MetadataStore for FileMetadataStore {
    fn create_new(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(id)?;
        let tmp = self.write_tmp(id, bytes)?;

        // link(2) fails if the target exists, which makes creation atomic.
        let linked = fs::hard_link(&tmp, &path);
        if let Err(e) = fs::remove_file(&tmp) {
            tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temporary file");
        }
        match linked {
            Ok(()) => self.sync_dir(),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::AlreadyExists(
                format!("consensus metadata for {id} already exists at {}", path.display()),
            )),
            Err(e) => Err(Error::io(format!("link {}", path.display()), e)),
        }
    }

    fn read(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        fs::read(&path).map_err(|e| not_found_or_io(id, &path, "read", e))
    }

    fn replace(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(id)?;
        let tmp = self.write_tmp(id, bytes)?;

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(format!("rename onto {}", path.display()), e));
        }
        self.sync_dir()
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        fs::remove_file(&path).map_err(|e| not_found_or_io(id, &path, "delete", e))?;
        self.sync_dir()
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        path.try_exists()
            .map_err(|e| Error::io(format!("stat {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(root: &TempDir) -> FileMetadataStore {
        FileMetadataStore::open(root.path(), StoreOptions::default_options()).unwrap()
    }

    fn leftover_tmp_files(store: &FileMetadataStore) -> usize {
        fs::read_dir(store.dir())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .contains(TMP_INFIX)
            })
            .count()
    }

    #[test]
    fn create_read_replace() {
        let root = TempDir::new().unwrap();
        let store = open(&root);

        assert!(!store.exists("t1").unwrap());
        store.create_new("t1", b"v1").unwrap();
        assert!(store.exists("t1").unwrap());
        assert_eq!(store.read("t1").unwrap(), b"v1");

        store.replace("t1", b"v2").unwrap();
        assert_eq!(store.read("t1").unwrap(), b"v2");
        assert_eq!(
            store.path_for("t1").unwrap(),
            root.path().join("consensus-meta").join("t1")
        );
        assert_eq!(leftover_tmp_files(&store), 0);
    }

    #[test]
    fn create_new_refuses_to_clobber() {
        let root = TempDir::new().unwrap();
        let store = open(&root);
        store.create_new("t1", b"original").unwrap();

        let err = store.create_new("t1", b"clobber").unwrap_err();
        assert!(err.is_already_exists());
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.read("t1").unwrap(), b"original");
        assert_eq!(leftover_tmp_files(&store), 0);
    }

    #[test]
    fn missing_records() {
        let root = TempDir::new().unwrap();
        let store = open(&root);
        assert!(store.read("nope").unwrap_err().is_not_found());
        assert!(store.delete("nope").unwrap_err().is_not_found());

        store.replace("t1", b"v1").unwrap();
        store.delete("t1").unwrap();
        assert!(store.delete("t1").unwrap_err().is_not_found());
    }

    #[test]
    fn stale_temporary_files_are_removed_on_open() {
        let root = TempDir::new().unwrap();
        let store = open(&root);
        store.replace("t1", b"v1").unwrap();
        fs::write(store.dir().join("t1.tmp.deadbeef"), b"half written").unwrap();
        drop(store);

        let store = open(&root);
        assert_eq!(leftover_tmp_files(&store), 0);
        assert_eq!(store.read("t1").unwrap(), b"v1");
    }

    #[test]
    fn unusable_ids_are_rejected() {
        let root = TempDir::new().unwrap();
        let store = open(&root);
        for id in ["", ".", "..", "a/b", "x.tmp.y"] {
            let err = store.create_new(id, b"v").unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{id:?}: {err}");
        }
    }

    #[test]
    fn works_without_fsync() {
        let root = TempDir::new().unwrap();
        let options = StoreOptions {
            fsync: false,
            dir_name: "cmeta".into(),
        };
        let store = FileMetadataStore::open(root.path(), options).unwrap();
        store.create_new("t1", b"v1").unwrap();
        assert!(root.path().join("cmeta").join("t1").exists());
    }
}
