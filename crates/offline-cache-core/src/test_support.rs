//! Scripted fetcher and recording storage for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{CacheError, Result};
use crate::expiry::CacheEntry;
use crate::fetch::Fetcher;
use crate::request::{RequestDescriptor, ResponseSnapshot};
use crate::store::{CacheStorage, MemoryStorage, StoreId};

#[derive(Clone)]
enum Script {
    Respond(ResponseSnapshot),
    Fail(String),
    Reject(String),
}

/// Fetcher answering from a per-URL script. Unscripted URLs fail.
/// A held URL blocks inside `fetch` until `release` is called.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    started: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.scripts.lock().unwrap().insert(
            url.to_string(),
            Script::Respond(ResponseSnapshot::new(status, body.as_bytes().to_vec())),
        );
    }

    pub fn fail(&self, url: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), Script::Fail(format!("connection refused: {}", url)));
    }

    /// Fail with an error that never reached the network
    pub fn reject(&self, url: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), Script::Reject(format!("malformed request: {}", url)));
    }

    pub fn hold(&self, url: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, url: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(url) {
            gate.add_permits(1);
        }
    }

    /// Wait until a fetch for `url` has entered the fetcher.
    pub async fn wait_started(&self, url: &str) {
        let signal = self.started_signal(url);
        signal.acquire().await.unwrap().forget();
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    fn started_signal(&self, url: &str) -> Arc<Semaphore> {
        self.started
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());
        self.started_signal(&url).add_permits(1);

        let gate = self.gates.lock().unwrap().get(&url).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let script = self.scripts.lock().unwrap().get(&url).cloned();
        match script {
            Some(Script::Respond(response)) => Ok(response),
            Some(Script::Fail(reason)) => Err(CacheError::FetchFailed(reason)),
            Some(Script::Reject(reason)) => Err(CacheError::InvalidRequest(reason)),
            None => Err(CacheError::FetchFailed(format!("no route to {}", url))),
        }
    }
}

/// Memory storage that counts every read and write.
#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryStorage,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl RecordingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self, id: &StoreId) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::storage(id, "quota exceeded"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for RecordingStorage {
    async fn stores(&self) -> Result<Vec<StoreId>> {
        self.inner.stores().await
    }

    async fn open(&self, id: &StoreId) -> Result<()> {
        self.check_write(id)?;
        self.inner.open(id).await
    }

    async fn delete_store(&self, id: &StoreId) -> Result<bool> {
        self.check_write(id)?;
        self.inner.delete_store(id).await
    }

    async fn get(&self, id: &StoreId, key: &str) -> Result<Option<CacheEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id, key).await
    }

    async fn put(&self, id: &StoreId, entry: CacheEntry) -> Result<()> {
        self.check_write(id)?;
        self.inner.put(id, entry).await
    }

    async fn delete(&self, id: &StoreId, key: &str) -> Result<bool> {
        self.check_write(id)?;
        self.inner.delete(id, key).await
    }

    async fn entries(&self, id: &StoreId) -> Result<Vec<CacheEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.entries(id).await
    }
}
