//! Ordered fallback chain shared by every caching strategy.
//!
//! A chain is a list of sources tried in order until one produces a
//! response. Network failures are remembered; if no later source answers,
//! the original network failure is returned unchanged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::background::BackgroundRefresh;
use super::{Handled, StrategyResult};
use crate::classifier::ResourceClass;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::CacheError;
use crate::expiry::{attach_freshness, is_fresh, CacheEntry};
use crate::fetch::{fetch_with_timeout, Fetcher};
use crate::request::{RequestDescriptor, ResponseSnapshot};
use crate::store::{StoreId, StoreRegistry};

/// Everything a chain needs to run one request against one version.
#[derive(Clone)]
pub(crate) struct ChainContext {
    pub registry: StoreRegistry,
    pub fetcher: Arc<dyn Fetcher>,
    pub clock: Arc<dyn Clock>,
    pub version: String,
}

impl ChainContext {
    pub fn store_id(&self, class: ResourceClass) -> StoreId {
        self.registry.store_id(&self.version, class)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    /// With `require_fresh`, an expired entry is deleted and skipped.
    Store {
        class: ResourceClass,
        require_fresh: bool,
    },
}

/// Where a successful (2xx) network response is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkWrite {
    Nothing,
    Store(ResourceClass),
    StoreWithTtl(ResourceClass, i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    pub sources: Vec<Source>,
    pub on_network: NetworkWrite,
    /// Store to refresh in the background after a store hit
    pub refresh_on_hit: Option<ResourceClass>,
    pub timeout: Duration,
}

impl FallbackChain {
    /// cache-first-with-background-refresh
    pub fn cache_first(timeout: Duration) -> Self {
        Self {
            sources: vec![
                Source::Store {
                    class: ResourceClass::Critical,
                    require_fresh: false,
                },
                Source::Store {
                    class: ResourceClass::Standard,
                    require_fresh: false,
                },
                Source::Network,
            ],
            on_network: NetworkWrite::Store(ResourceClass::Critical),
            refresh_on_hit: Some(ResourceClass::Critical),
            timeout,
        }
    }

    /// network-first-with-short-lived-cache
    pub fn network_first_short_lived(ttl_secs: i64, timeout: Duration) -> Self {
        Self {
            sources: vec![
                Source::Network,
                Source::Store {
                    class: ResourceClass::ApiShortCache,
                    require_fresh: true,
                },
            ],
            on_network: NetworkWrite::StoreWithTtl(ResourceClass::ApiShortCache, ttl_secs),
            refresh_on_hit: None,
            timeout,
        }
    }

    /// network-first-then-cache
    pub fn network_first(timeout: Duration) -> Self {
        Self {
            sources: vec![
                Source::Network,
                Source::Store {
                    class: ResourceClass::Standard,
                    require_fresh: false,
                },
            ],
            on_network: NetworkWrite::Store(ResourceClass::Standard),
            refresh_on_hit: None,
            timeout,
        }
    }

    pub fn passthrough(timeout: Duration) -> Self {
        Self {
            sources: vec![Source::Network],
            on_network: NetworkWrite::Nothing,
            refresh_on_hit: None,
            timeout,
        }
    }

    pub fn for_class(class: ResourceClass, config: &Config) -> Self {
        let timeout = config.timeouts.for_class(class);
        match class {
            ResourceClass::Critical => Self::cache_first(timeout),
            ResourceClass::ApiShortCache => {
                Self::network_first_short_lived(config.api_ttl_secs, timeout)
            }
            ResourceClass::Standard => Self::network_first(timeout),
            ResourceClass::NeverCache => Self::passthrough(timeout),
        }
    }

    pub(crate) async fn run(&self, ctx: &ChainContext, request: &RequestDescriptor) -> Handled {
        let key = request.cache_key();
        let mut network_error: Option<CacheError> = None;

        for source in &self.sources {
            match *source {
                Source::Network => {
                    match fetch_with_timeout(ctx.fetcher.as_ref(), request, self.timeout).await {
                        Ok(response) => {
                            self.write_network_response(ctx, &key, &response).await;
                            return Handled::new(StrategyResult::ServedFromNetwork(response));
                        }
                        Err(e) if e.is_network_failure() => {
                            debug!(url = %request.url, error = %e, "Network leg failed");
                            network_error = Some(e);
                        }
                        Err(e) => {
                            warn!(url = %request.url, error = %e, "Request rejected before reaching the network");
                            return Handled::new(StrategyResult::Error(e));
                        }
                    }
                }
                Source::Store {
                    class,
                    require_fresh,
                } => {
                    let id = ctx.store_id(class);
                    let Some(entry) = ctx.registry.lookup(&id, &key).await else {
                        continue;
                    };

                    if require_fresh && !is_fresh(&entry, ctx.clock.now()) {
                        debug!(store = %id, key = %key, "Entry expired, evicting");
                        ctx.registry.evict(&id, &key).await;
                        continue;
                    }

                    if network_error.is_some() {
                        return Handled::new(StrategyResult::ServedStaleOnFailure(entry.response));
                    }

                    let refresh = self.refresh_on_hit.map(|class| {
                        BackgroundRefresh::spawn(ctx.clone(), request.clone(), class, self.timeout)
                    });
                    return Handled::with_refresh(StrategyResult::ServedFromCache(entry.response), refresh);
                }
            }
        }

        let error = network_error.unwrap_or_else(|| {
            CacheError::FetchFailed(format!("no source answered for {}", request.url))
        });
        Handled::new(StrategyResult::Error(error))
    }

    /// Store a network response. Write failures are logged, never surfaced.
    async fn write_network_response(&self, ctx: &ChainContext, key: &str, response: &ResponseSnapshot) {
        let (class, ttl) = match self.on_network {
            NetworkWrite::Nothing => return,
            NetworkWrite::Store(class) => (class, None),
            NetworkWrite::StoreWithTtl(class, ttl) => (class, Some(ttl)),
        };
        if !response.is_success() {
            debug!(key, status = response.status, "Not storing non-success response");
            return;
        }

        let now = ctx.clock.now();
        let mut entry = CacheEntry::new(key, response.clone(), now);
        if let Some(ttl) = ttl {
            entry = attach_freshness(entry, ttl, now);
        }

        let id = ctx.store_id(class);
        if let Err(e) = ctx.registry.put(&id, entry).await {
            warn!(store = %id, key, error = %e, "Failed to write response to store");
        }
    }
}
