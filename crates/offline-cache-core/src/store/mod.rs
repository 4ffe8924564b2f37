//! Named, versioned cache stores.
//!
//! Every store is identified by a structured `StoreId` of scope, deploy
//! version and resource class. Nothing here parses store names, so cleanup
//! cannot confuse `v1` with `v10`.
//!
//! Backends:
//! - `MemoryStorage`: in-process, used by tests and ephemeral runtimes
//! - `DiskStorage`: JSON files under the cache directory

pub mod disk;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::ResourceClass;
use crate::error::Result;
use crate::expiry::{age_display, CacheEntry};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId {
    pub scope: String,
    pub version: String,
    pub class: ResourceClass,
}

impl StoreId {
    pub fn new(scope: impl Into<String>, version: impl Into<String>, class: ResourceClass) -> Self {
        Self {
            scope: scope.into(),
            version: version.into(),
            class,
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.version, self.class)
    }
}

/// Persistence layer behind the registry. Every operation is atomic per key;
/// `put` overwrites and creates the store on first write.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn stores(&self) -> Result<Vec<StoreId>>;

    /// Create the store if it does not exist yet.
    async fn open(&self, id: &StoreId) -> Result<()>;

    /// Returns false when the store did not exist.
    async fn delete_store(&self, id: &StoreId) -> Result<bool>;

    /// Reads never create the store.
    async fn get(&self, id: &StoreId, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, id: &StoreId, entry: CacheEntry) -> Result<()>;

    async fn delete(&self, id: &StoreId, key: &str) -> Result<bool>;

    async fn entries(&self, id: &StoreId) -> Result<Vec<CacheEntry>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub id: StoreId,
    pub entries: usize,
    pub newest: Option<DateTime<Utc>>,
}

impl StoreSummary {
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        self.newest
            .map(|t| age_display((now - t).num_minutes()))
            .unwrap_or_else(|| "never".to_string())
    }
}

/// Shared handle to the stores owned by one runtime scope.
/// Clone is cheap; the backend sits behind an Arc.
#[derive(Clone)]
pub struct StoreRegistry {
    storage: Arc<dyn CacheStorage>,
    scope: String,
}

impl StoreRegistry {
    pub fn new(storage: Arc<dyn CacheStorage>, scope: impl Into<String>) -> Self {
        Self {
            storage,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn store_id(&self, version: &str, class: ResourceClass) -> StoreId {
        StoreId::new(self.scope.clone(), version, class)
    }

    pub async fn open(&self, id: &StoreId) -> Result<()> {
        self.storage.open(id).await
    }

    /// Look up an entry; a storage error is logged and treated as a miss.
    pub async fn lookup(&self, id: &StoreId, key: &str) -> Option<CacheEntry> {
        match self.storage.get(id, key).await {
            Ok(Some(entry)) => {
                debug!(store = %id, key, "Store hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(store = %id, key, "Store miss");
                None
            }
            Err(e) => {
                warn!(store = %id, key, error = %e, "Store read failed, treating as miss");
                None
            }
        }
    }

    pub async fn put(&self, id: &StoreId, entry: CacheEntry) -> Result<()> {
        self.storage.put(id, entry).await
    }

    /// Delete one entry, logging rather than surfacing failures
    pub async fn evict(&self, id: &StoreId, key: &str) {
        match self.storage.delete(id, key).await {
            Ok(_) => debug!(store = %id, key, "Entry evicted"),
            Err(e) => warn!(store = %id, key, error = %e, "Failed to evict entry"),
        }
    }

    /// All stores in the backend, across every scope and version
    pub async fn stores(&self) -> Result<Vec<StoreId>> {
        let mut ids = self.storage.stores().await?;
        ids.sort();
        Ok(ids)
    }

    pub async fn delete_store(&self, id: &StoreId) -> Result<bool> {
        self.storage.delete_store(id).await
    }

    pub async fn summary(&self) -> Result<Vec<StoreSummary>> {
        let mut summaries = Vec::new();
        for id in self.stores().await? {
            let entries = self.storage.entries(&id).await?;
            summaries.push(StoreSummary {
                newest: entries.iter().map(|e| e.stored_at).max(),
                entries: entries.len(),
                id,
            });
        }
        Ok(summaries)
    }
}
