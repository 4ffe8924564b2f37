//! Install, activate and runtime invalidation of versioned stores.
//!
//! A runtime moves through `New -> Installing -> Installed -> Activating ->
//! Active`. A failed install ends in `Redundant`. Several versions' stores
//! may coexist on disk until the newest version activates and purges the rest.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::classifier::ResourceClass;
use crate::clients::ClientRegistry;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::expiry::CacheEntry;
use crate::fetch::{fetch_with_timeout, Fetcher};
use crate::messages::OutboundMessage;
use crate::request::RequestDescriptor;
use crate::store::{StoreId, StoreRegistry};

/// Maximum concurrent manifest fetches during install and preload.
const MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    New,
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::New => "new",
            LifecyclePhase::Installing => "installing",
            LifecyclePhase::Installed => "installed",
            LifecyclePhase::Activating => "activating",
            LifecyclePhase::Active => "active",
            LifecyclePhase::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of one runtime instance, shared by handle with the
/// strategy executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeState {
    pub version: String,
    pub phase: LifecyclePhase,
    /// Set by install: supersede older instances without waiting for them
    pub skip_waiting: bool,
}

impl RuntimeState {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            phase: LifecyclePhase::New,
            skip_waiting: false,
        }
    }

    /// State of a runtime restarted over an already-active version
    pub fn resumed(version: impl Into<String>) -> Self {
        Self {
            phase: LifecyclePhase::Active,
            ..Self::new(version)
        }
    }
}

pub type RuntimeStateHandle = Arc<RwLock<RuntimeState>>;

#[derive(Debug, Default)]
pub struct PreloadReport {
    pub stored: usize,
    pub failed: Vec<String>,
}

pub struct ActivationReport {
    pub version: String,
    pub deleted: Vec<StoreId>,
    pub claimed: usize,
    pub notified: usize,
    /// Best-effort warm-up of the preload list, running detached
    pub preload: JoinHandle<PreloadReport>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub deleted: Vec<StoreId>,
    pub failed: Vec<StoreId>,
}

pub struct LifecycleManager {
    config: Arc<Config>,
    registry: StoreRegistry,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    clients: Arc<ClientRegistry>,
    state: RuntimeStateHandle,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<Config>,
        registry: StoreRegistry,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        clients: Arc<ClientRegistry>,
        state: RuntimeStateHandle,
    ) -> Self {
        Self {
            config,
            registry,
            fetcher,
            clock,
            clients,
            state,
        }
    }

    pub fn state(&self) -> RuntimeStateHandle {
        Arc::clone(&self.state)
    }

    async fn transition(&self, from: LifecyclePhase, to: LifecyclePhase) -> Result<String> {
        let mut state = self.state.write().await;
        if state.phase != from {
            return Err(CacheError::InvalidTransition {
                from: state.phase,
                to,
            });
        }
        debug!(version = %state.version, %from, %to, "Lifecycle transition");
        state.phase = to;
        Ok(state.version.clone())
    }

    async fn set_phase(&self, phase: LifecyclePhase) {
        self.state.write().await.phase = phase;
    }

    /// Populate this version's standard and critical stores from their
    /// manifests. Any single failure fails the whole install.
    pub async fn install(&self) -> Result<()> {
        let version = self
            .transition(LifecyclePhase::New, LifecyclePhase::Installing)
            .await?;
        info!(%version, "Installing");

        let standard = self.registry.store_id(&version, ResourceClass::Standard);
        let critical = self.registry.store_id(&version, ResourceClass::Critical);

        // Stores that already exist may be serving a live version
        let preexisting = match self.registry.stores().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(%version, error = %e, "Failed to enumerate stores before install");
                vec![standard.clone(), critical.clone()]
            }
        };

        let populated = futures::try_join!(
            self.populate(&standard, &self.config.baseline_manifest),
            self.populate(&critical, &self.config.critical_manifest),
        );

        if let Err(e) = populated {
            warn!(%version, error = %e, "Install failed");
            for id in [&standard, &critical] {
                if preexisting.contains(id) {
                    continue;
                }
                if let Err(e) = self.registry.delete_store(id).await {
                    warn!(store = %id, error = %e, "Failed to remove partially installed store");
                }
            }
            self.set_phase(LifecyclePhase::Redundant).await;
            return Err(CacheError::Install {
                version,
                reason: e.to_string(),
            });
        }

        {
            let mut state = self.state.write().await;
            state.phase = LifecyclePhase::Installed;
            state.skip_waiting = true;
        }
        info!(%version, "Installed");
        Ok(())
    }

    async fn populate(&self, id: &StoreId, manifest: &[String]) -> Result<()> {
        self.registry.open(id).await?;
        let timeout = self.config.timeouts.install();

        stream::iter(manifest.iter().map(Ok::<_, CacheError>))
            .try_for_each_concurrent(MAX_CONCURRENT_FETCHES, |path| async move {
                let request = RequestDescriptor::for_manifest(&self.config.origin, path)?;
                let response =
                    fetch_with_timeout(self.fetcher.as_ref(), &request, timeout).await?;
                if !response.is_success() {
                    return Err(CacheError::Status {
                        status: response.status,
                        url: request.url.to_string(),
                    });
                }
                let entry = CacheEntry::new(request.cache_key(), response, self.clock.now());
                self.registry.put(id, entry).await?;
                debug!(store = %id, url = %request.url, "Manifest resource stored");
                Ok(())
            })
            .await
    }

    /// Purge every store outside this version's allow-list, claim all
    /// clients, start the preload warm-up and announce the new version.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let version = self
            .transition(LifecyclePhase::Installed, LifecyclePhase::Activating)
            .await?;
        info!(%version, "Activating");

        let allowed: Vec<StoreId> = ResourceClass::STORED
            .iter()
            .map(|class| self.registry.store_id(&version, *class))
            .collect();

        let mut deleted = Vec::new();
        match self.registry.stores().await {
            Ok(existing) => {
                for id in existing.into_iter().filter(|id| !allowed.contains(id)) {
                    match self.registry.delete_store(&id).await {
                        Ok(_) => {
                            info!(store = %id, "Deleted obsolete store");
                            deleted.push(id);
                        }
                        Err(e) => warn!(store = %id, error = %e, "Failed to delete obsolete store"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to enumerate stores for cleanup"),
        }

        let claimed = self.clients.claim(&version).await;
        let preload = self.spawn_preload(&version);

        self.set_phase(LifecyclePhase::Active).await;
        let notified = self
            .clients
            .broadcast(OutboundMessage::Activated {
                version: version.clone(),
            })
            .await;
        info!(%version, claimed, notified, deleted = deleted.len(), "Activated");

        Ok(ActivationReport {
            version,
            deleted,
            claimed,
            notified,
            preload,
        })
    }

    fn spawn_preload(&self, version: &str) -> JoinHandle<PreloadReport> {
        let id = self.registry.store_id(version, ResourceClass::Critical);
        let registry = self.registry.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let clock = Arc::clone(&self.clock);
        let origin = self.config.origin.clone();
        let paths = self.config.preload.clone();
        let timeout = self.config.timeouts.install();

        tokio::spawn(async move {
            let results: Vec<std::result::Result<(), String>> = stream::iter(paths)
                .map(|path| {
                    let id = id.clone();
                    let registry = registry.clone();
                    let fetcher = Arc::clone(&fetcher);
                    let clock = Arc::clone(&clock);
                    let origin = origin.clone();
                    async move {
                        let stored = preload_one(
                            &id,
                            &registry,
                            fetcher.as_ref(),
                            clock.as_ref(),
                            &origin,
                            &path,
                            timeout,
                        )
                        .await;
                        stored.map_err(|e| {
                            warn!(path = %path, error = %e, "Preload failed");
                            path
                        })
                    }
                })
                .buffer_unordered(MAX_CONCURRENT_FETCHES)
                .collect()
                .await;

            let mut report = PreloadReport::default();
            for result in results {
                match result {
                    Ok(()) => report.stored += 1,
                    Err(path) => report.failed.push(path),
                }
            }
            debug!(stored = report.stored, failed = report.failed.len(), "Preload complete");
            report
        })
    }

    /// Delete every store owned by this runtime's scope, regardless of version.
    pub async fn clear_all(&self) -> ClearReport {
        let mut report = ClearReport::default();
        let existing = match self.registry.stores().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate stores for clearing");
                return report;
            }
        };

        for id in existing.into_iter().filter(|id| id.scope == self.registry.scope()) {
            match self.registry.delete_store(&id).await {
                Ok(_) => report.deleted.push(id),
                Err(e) => {
                    warn!(store = %id, error = %e, "Failed to delete store");
                    report.failed.push(id);
                }
            }
        }
        info!(deleted = report.deleted.len(), failed = report.failed.len(), "Caches cleared");
        report
    }
}

async fn preload_one(
    id: &StoreId,
    registry: &StoreRegistry,
    fetcher: &dyn Fetcher,
    clock: &dyn Clock,
    origin: &Url,
    path: &str,
    timeout: std::time::Duration,
) -> Result<()> {
    let request = RequestDescriptor::for_manifest(origin, path)?;
    let response = fetch_with_timeout(fetcher, &request, timeout).await?;
    if !response.is_success() {
        return Err(CacheError::Status {
            status: response.status,
            url: request.url.to_string(),
        });
    }
    let entry = CacheEntry::new(request.cache_key(), response, clock.now());
    registry.put(id, entry).await
}
