//! Durable map — opaque key→bytes store with prefix range-scan.
//!
//! Backed by an embedded sled tree. Keys are `prefix + name`; every domain
//! owns its own prefix (`/rtspprocess/`, `/appprocess/`, `/settings/`,
//! `/dockertagsettings/`).

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open datastore: {0}")]
    Open(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Embedded key→bytes store shared by all domain managers.
#[derive(Clone)]
pub struct DurableMap {
    db: sled::Db,
}

impl DurableMap {
    /// Open (or create) the datastore at `path`. Failure here is fatal.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(DurableMap { db })
    }

    pub fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let full = format!("{}{}", prefix, key);
        match self.db.get(full.as_bytes())? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StoreError::KeyNotFound(full)),
        }
    }

    pub fn put(&self, prefix: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let full = format!("{}{}", prefix, key);
        self.db.insert(full.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Delete is idempotent: removing an absent key succeeds.
    pub fn del(&self, prefix: &str, key: &str) -> Result<(), StoreError> {
        let full = format!("{}{}", prefix, key);
        self.db.remove(full.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// All values stored under `prefix`, in key order.
    pub fn list(&self, prefix: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut values = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            values.push(value.to_vec());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (DurableMap, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let map = DurableMap::open(dir.path()).unwrap();
        (map, dir)
    }

    #[test]
    fn put_get_roundtrip() {
        let (map, _dir) = open_temp();
        map.put("/rtspprocess/", "cam1", b"payload").unwrap();
        assert_eq!(map.get("/rtspprocess/", "cam1").unwrap(), b"payload");
    }

    #[test]
    fn get_missing_is_key_not_found() {
        let (map, _dir) = open_temp();
        let err = map.get("/rtspprocess/", "ghost").unwrap_err();
        assert!(matches!(err, StoreError::KeyNotFound(_)));
    }

    #[test]
    fn del_is_idempotent() {
        let (map, _dir) = open_temp();
        map.put("/rtspprocess/", "cam1", b"x").unwrap();
        map.del("/rtspprocess/", "cam1").unwrap();
        map.del("/rtspprocess/", "cam1").unwrap();
        assert!(map.get("/rtspprocess/", "cam1").is_err());
    }

    #[test]
    fn list_scans_only_the_prefix() {
        let (map, _dir) = open_temp();
        map.put("/rtspprocess/", "cam1", b"a").unwrap();
        map.put("/rtspprocess/", "cam2", b"b").unwrap();
        map.put("/appprocess/", "app1", b"c").unwrap();
        let cams = map.list("/rtspprocess/").unwrap();
        assert_eq!(cams.len(), 2);
        let apps = map.list("/appprocess/").unwrap();
        assert_eq!(apps, vec![b"c".to_vec()]);
    }

    #[test]
    fn list_empty_prefix_is_empty() {
        let (map, _dir) = open_temp();
        assert!(map.list("/dockertagsettings/").unwrap().is_empty());
    }
}
