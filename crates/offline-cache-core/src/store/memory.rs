//! In-memory store backend
//!
//! Stores live in a `HashMap` behind a tokio `RwLock` and are lost when the
//! runtime exits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheStorage, StoreId};
use crate::error::Result;
use crate::expiry::CacheEntry;

type Stores = HashMap<StoreId, HashMap<String, CacheEntry>>;

#[derive(Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<RwLock<Stores>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn stores(&self) -> Result<Vec<StoreId>> {
        Ok(self.stores.read().await.keys().cloned().collect())
    }

    async fn open(&self, id: &StoreId) -> Result<()> {
        self.stores.write().await.entry(id.clone()).or_default();
        Ok(())
    }

    async fn delete_store(&self, id: &StoreId) -> Result<bool> {
        Ok(self.stores.write().await.remove(id).is_some())
    }

    async fn get(&self, id: &StoreId, key: &str) -> Result<Option<CacheEntry>> {
        let stores = self.stores.read().await;
        Ok(stores.get(id).and_then(|s| s.get(key)).cloned())
    }

    async fn put(&self, id: &StoreId, entry: CacheEntry) -> Result<()> {
        let mut stores = self.stores.write().await;
        stores
            .entry(id.clone())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, id: &StoreId, key: &str) -> Result<bool> {
        let mut stores = self.stores.write().await;
        Ok(stores
            .get_mut(id)
            .map(|s| s.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn entries(&self, id: &StoreId) -> Result<Vec<CacheEntry>> {
        let stores = self.stores.read().await;
        Ok(stores
            .get(id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default())
    }
}
