use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::CadenceError;

/// Durable key/blob storage used by the session manager and audit ledger.
///
/// Keys are slash-separated paths ("sessions/<id>", "audit/<id>"); `list`
/// enumerates stored keys under a prefix so retention sweeps and restores
/// can find what exists.
pub trait PersistenceStore: Send + Sync {
    fn write(&self, key: &str, blob: &[u8]) -> Result<(), CadenceError>;
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CadenceError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, CadenceError>;
    fn delete(&self, key: &str) -> Result<(), CadenceError>;
}

/// In-memory store: the fast restore tier, and the default for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl PersistenceStore for MemoryStore {
    fn write(&self, key: &str, blob: &[u8]) -> Result<(), CadenceError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CadenceError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, CadenceError> {
        let entries = self.entries.lock().unwrap();
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), CadenceError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// File-per-key store rooted at a directory. Each key maps to
/// `<root>/<key>.json`; parent directories are created on write.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<(), CadenceError> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_keys(&path, keys)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|e| CadenceError::Store(e.to_string()))?;
                let key = relative.with_extension("");
                keys.push(key.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl PersistenceStore for FileStore {
    fn write(&self, key: &str, blob: &[u8]) -> Result<(), CadenceError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, blob)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CadenceError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, CadenceError> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), CadenceError> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.write("sessions/abc", b"{\"x\":1}").unwrap();

        assert_eq!(store.read("sessions/abc").unwrap().unwrap(), b"{\"x\":1}");
        assert_eq!(store.read("sessions/missing").unwrap(), None);
    }

    #[test]
    fn memory_store_list_and_delete() {
        let store = MemoryStore::new();
        store.write("sessions/a", b"1").unwrap();
        store.write("sessions/b", b"2").unwrap();
        store.write("audit/a", b"3").unwrap();

        assert_eq!(store.list("sessions/").unwrap(), vec!["sessions/a", "sessions/b"]);

        store.delete("sessions/a").unwrap();
        assert_eq!(store.list("sessions/").unwrap(), vec!["sessions/b"]);
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.write("sessions/abc", b"{\"status\":\"Running\"}").unwrap();
        assert_eq!(
            store.read("sessions/abc").unwrap().unwrap(),
            b"{\"status\":\"Running\"}"
        );
        assert!(dir.path().join("sessions/abc.json").exists());

        store.delete("sessions/abc").unwrap();
        assert_eq!(store.read("sessions/abc").unwrap(), None);
    }

    #[test]
    fn file_store_lists_nested_keys_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.write("sessions/a", b"1").unwrap();
        store.write("archive/sessions/b", b"2").unwrap();
        store.write("audit/c", b"3").unwrap();

        assert_eq!(store.list("sessions/").unwrap(), vec!["sessions/a"]);
        assert_eq!(
            store.list("archive/").unwrap(),
            vec!["archive/sessions/b"]
        );
        let all = store.list("").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn file_store_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.read("nothing/here").unwrap(), None);
        assert!(store.list("nothing/").unwrap().is_empty());
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.delete("ghost").unwrap();
    }
}
