//! Caching strategies, one per resource class.
//!
//! All strategies run through the same `FallbackChain` core:
//! - critical: stores first, network last, background refresh on a hit
//! - api-short-cache: network first, then a fresh entry from the api store
//! - standard: network first, then any entry from the standard store
//! - never-cache: network only, no store access in either direction

pub mod background;
pub mod chain;

use std::collections::HashMap;
use std::sync::Arc;

use crate::classifier::ResourceClass;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::CacheError;
use crate::fetch::Fetcher;
use crate::lifecycle::RuntimeStateHandle;
use crate::request::{RequestDescriptor, ResponseSnapshot};
use crate::store::StoreRegistry;

pub use background::{BackgroundRefresh, RefreshHandle, RefreshOutcome};
pub use chain::{FallbackChain, NetworkWrite, Source};

use chain::ChainContext;

#[derive(Debug)]
pub enum StrategyResult {
    ServedFromCache(ResponseSnapshot),
    ServedFromNetwork(ResponseSnapshot),
    ServedStaleOnFailure(ResponseSnapshot),
    Error(CacheError),
}

impl StrategyResult {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyResult::ServedFromCache(_) => "served-from-cache",
            StrategyResult::ServedFromNetwork(_) => "served-from-network",
            StrategyResult::ServedStaleOnFailure(_) => "served-stale-on-failure",
            StrategyResult::Error(_) => "error",
        }
    }

    pub fn response(&self) -> Option<&ResponseSnapshot> {
        match self {
            StrategyResult::ServedFromCache(r)
            | StrategyResult::ServedFromNetwork(r)
            | StrategyResult::ServedStaleOnFailure(r) => Some(r),
            StrategyResult::Error(_) => None,
        }
    }

    pub fn into_result(self) -> Result<ResponseSnapshot, CacheError> {
        match self {
            StrategyResult::ServedFromCache(r)
            | StrategyResult::ServedFromNetwork(r)
            | StrategyResult::ServedStaleOnFailure(r) => Ok(r),
            StrategyResult::Error(e) => Err(e),
        }
    }
}

/// Outcome of one intercepted request, before it is handed to the caller.
///
/// A pending background refresh may not write until this value is
/// delivered (or dropped), so the cached response always goes out first.
pub struct Handled {
    result: StrategyResult,
    refresh: Option<BackgroundRefresh>,
}

/// A delivered response plus the released background refresh, if any.
pub struct Delivered {
    pub result: StrategyResult,
    pub refresh: Option<RefreshHandle>,
}

impl Handled {
    pub(crate) fn new(result: StrategyResult) -> Self {
        Self {
            result,
            refresh: None,
        }
    }

    pub(crate) fn with_refresh(result: StrategyResult, refresh: Option<BackgroundRefresh>) -> Self {
        Self { result, refresh }
    }

    pub fn result(&self) -> &StrategyResult {
        &self.result
    }

    pub fn has_background_refresh(&self) -> bool {
        self.refresh.is_some()
    }

    pub fn deliver(self) -> Delivered {
        Delivered {
            result: self.result,
            refresh: self.refresh.map(BackgroundRefresh::release),
        }
    }

    pub fn into_response(self) -> Result<ResponseSnapshot, CacheError> {
        self.deliver().result.into_result()
    }
}

pub struct StrategyExecutor {
    registry: StoreRegistry,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    state: RuntimeStateHandle,
    chains: HashMap<ResourceClass, FallbackChain>,
}

impl StrategyExecutor {
    pub fn new(
        config: &Config,
        registry: StoreRegistry,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        state: RuntimeStateHandle,
    ) -> Self {
        let chains = [
            ResourceClass::Critical,
            ResourceClass::Standard,
            ResourceClass::ApiShortCache,
            ResourceClass::NeverCache,
        ]
        .into_iter()
        .map(|class| (class, FallbackChain::for_class(class, config)))
        .collect();

        Self {
            registry,
            fetcher,
            clock,
            state,
            chains,
        }
    }

    pub fn chain(&self, class: ResourceClass) -> &FallbackChain {
        &self.chains[&class]
    }

    /// Run the strategy for `class`. Non-GET requests always pass through,
    /// so nothing but GET responses ever reaches a store.
    pub async fn execute(&self, class: ResourceClass, request: &RequestDescriptor) -> Handled {
        let class = if request.is_get() {
            class
        } else {
            ResourceClass::NeverCache
        };

        let ctx = ChainContext {
            registry: self.registry.clone(),
            fetcher: Arc::clone(&self.fetcher),
            clock: Arc::clone(&self.clock),
            version: self.state.read().await.version.clone(),
        };
        self.chain(class).run(&ctx, request).await
    }
}
