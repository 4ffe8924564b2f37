//! On-disk store backend.
//!
//! Layout under the cache directory:
//!
//! ```text
//! <root>/<sha256(store id)>/store.json        descriptor holding the StoreId
//! <root>/<sha256(store id)>/<sha256(key)>.json one file per entry
//! ```
//!
//! Stores are enumerated by reading descriptors, never by parsing directory
//! names. Entry writes go to a temp file and are renamed into place so a
//! reader never sees a half-written entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::{CacheStorage, StoreId};
use crate::error::{CacheError, Result};
use crate::expiry::CacheEntry;

/// Descriptor file written into each store directory
const STORE_DESCRIPTOR: &str = "store.json";

/// Shared by every instance in the process; the pid separates processes
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|e| CacheError::Backend(format!("{}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    fn store_dir(&self, id: &StoreId) -> PathBuf {
        // NUL cannot appear in any component, so the joined form is unambiguous
        let name = digest(&format!("{}\0{}\0{}", id.scope, id.version, id.class));
        self.root.join(name)
    }

    fn entry_path(&self, id: &StoreId, key: &str) -> PathBuf {
        self.store_dir(id).join(format!("{}.json", digest(key)))
    }

    async fn write_atomic(&self, id: &StoreId, path: &Path, contents: Vec<u8>) -> Result<()> {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}-{}", std::process::id(), n));
        fs::write(&tmp, contents)
            .await
            .map_err(|e| CacheError::storage(id, e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| CacheError::storage(id, e))
    }

    async fn read_descriptor(path: &Path) -> Option<StoreId> {
        let contents = fs::read(path.join(STORE_DESCRIPTOR)).await.ok()?;
        match serde_json::from_slice(&contents) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping store with unreadable descriptor");
                None
            }
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn stores(&self) -> Result<Vec<StoreId>> {
        let mut ids = Vec::new();
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?
        {
            if let Some(id) = Self::read_descriptor(&item.path()).await {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn open(&self, id: &StoreId) -> Result<()> {
        let dir = self.store_dir(id);
        let descriptor = dir.join(STORE_DESCRIPTOR);
        if fs::try_exists(&descriptor).await.unwrap_or(false) {
            return Ok(());
        }
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::storage(id, e))?;
        let contents = serde_json::to_vec_pretty(id)?;
        self.write_atomic(id, &descriptor, contents).await?;
        debug!(store = %id, "Store created");
        Ok(())
    }

    async fn delete_store(&self, id: &StoreId) -> Result<bool> {
        match fs::remove_dir_all(self.store_dir(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(id, e)),
        }
    }

    async fn get(&self, id: &StoreId, key: &str) -> Result<Option<CacheEntry>> {
        let contents = match fs::read(self.entry_path(id, key)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::storage(id, e)),
        };
        let entry: CacheEntry = serde_json::from_slice(&contents)?;
        Ok(Some(entry))
    }

    async fn put(&self, id: &StoreId, entry: CacheEntry) -> Result<()> {
        self.open(id).await?;
        let path = self.entry_path(id, &entry.key);
        let contents = serde_json::to_vec(&entry)?;
        self.write_atomic(id, &path, contents).await
    }

    async fn delete(&self, id: &StoreId, key: &str) -> Result<bool> {
        match fs::remove_file(self.entry_path(id, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(id, e)),
        }
    }

    async fn entries(&self, id: &StoreId) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(self.store_dir(id)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(CacheError::storage(id, e)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::storage(id, e))?
        {
            let path = item.path();
            let is_entry = path.extension().map(|ext| ext == "json").unwrap_or(false)
                && path.file_name().map(|n| n != STORE_DESCRIPTOR).unwrap_or(false);
            if !is_entry {
                continue;
            }
            match fs::read(&path).await.map(|c| serde_json::from_slice::<CacheEntry>(&c)) {
                Ok(Ok(entry)) => entries.push(entry),
                Ok(Err(e)) => warn!(store = %id, error = %e, "Skipping unreadable entry"),
                Err(e) => warn!(store = %id, error = %e, "Failed to read entry"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ResourceClass;
    use crate::expiry::attach_freshness;
    use crate::request::ResponseSnapshot;
    use chrono::Utc;

    fn storage() -> (tempfile::TempDir, DiskStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().join("stores")).unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_put_get_round_trip_with_freshness() {
        let (_dir, storage) = storage();
        let id = StoreId::new("app", "v1", ResourceClass::ApiShortCache);
        let now = Utc::now();
        let response = ResponseSnapshot::new(200, r#"[{"id":1}]"#)
            .with_header("content-type", "application/json");
        let entry = attach_freshness(CacheEntry::new("GET https://api/x", response, now), 60, now);

        storage.put(&id, entry.clone()).await.unwrap();
        assert_eq!(storage.get(&id, "GET https://api/x").await.unwrap(), Some(entry));
        assert_eq!(storage.entries(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stores_enumerated_from_descriptors() {
        let (_dir, storage) = storage();
        let v1 = StoreId::new("app", "v1", ResourceClass::Standard);
        let v10 = StoreId::new("app", "v10", ResourceClass::Standard);
        storage.open(&v1).await.unwrap();
        storage.open(&v10).await.unwrap();

        let mut ids = storage.stores().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![v1.clone(), v10.clone()]);

        assert!(storage.delete_store(&v1).await.unwrap());
        assert_eq!(storage.stores().await.unwrap(), vec![v10]);
    }

    #[tokio::test]
    async fn test_missing_entries_and_stores() {
        let (_dir, storage) = storage();
        let id = StoreId::new("app", "v1", ResourceClass::Critical);

        assert!(storage.get(&id, "GET nothing").await.unwrap().is_none());
        assert!(!storage.delete(&id, "GET nothing").await.unwrap());
        assert!(!storage.delete_store(&id).await.unwrap());
        assert!(storage.entries(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writers_share_a_root() {
        let (dir, first) = storage();
        let second = DiskStorage::new(dir.path().join("stores")).unwrap();
        let id = StoreId::new("app", "v1", ResourceClass::Standard);
        let now = Utc::now();
        let entry = |body: &str| {
            CacheEntry::new("GET https://localhost/a", ResponseSnapshot::new(200, body), now)
        };

        for _ in 0..20 {
            let (a, b) = tokio::join!(first.put(&id, entry("a")), second.put(&id, entry("b")));
            a.unwrap();
            b.unwrap();
        }
        assert_eq!(first.entries(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_file() {
        let (_dir, storage) = storage();
        let id = StoreId::new("app", "v1", ResourceClass::Standard);
        let now = Utc::now();

        for body in ["one", "two"] {
            let entry = CacheEntry::new("GET https://localhost/a", ResponseSnapshot::new(200, body), now);
            storage.put(&id, entry).await.unwrap();
        }

        let entries = storage.entries(&id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response.body, b"two".to_vec());
    }
}
