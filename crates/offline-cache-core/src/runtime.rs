//! The runtime facade: one instance per deployed version.
//!
//! `CacheRuntime` wires the classifier, strategy executor and lifecycle
//! manager around a shared `RuntimeState` and dispatches runtime events
//! (install, activate, intercepted request, client message).

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, ResourceClass};
use crate::clients::{ClientId, ClientRegistry};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::lifecycle::{
    ActivationReport, ClearReport, LifecycleManager, RuntimeState, RuntimeStateHandle,
};
use crate::messages::{InboundMessage, OutboundMessage};
use crate::request::{RequestDescriptor, ResponseSnapshot};
use crate::store::{CacheStorage, DiskStorage, StoreRegistry};
use crate::strategy::{Handled, StrategyExecutor};

pub enum RuntimeEvent {
    Install,
    Activate,
    Fetch(RequestDescriptor),
    Message {
        from: ClientId,
        message: InboundMessage,
    },
}

pub enum EventOutcome {
    Installed,
    Activated(ActivationReport),
    Fetched(Handled),
    MessageHandled,
}

pub struct CacheRuntime {
    config: Arc<Config>,
    registry: StoreRegistry,
    classifier: Classifier,
    executor: StrategyExecutor,
    lifecycle: LifecycleManager,
    clients: Arc<ClientRegistry>,
    state: RuntimeStateHandle,
}

impl CacheRuntime {
    pub fn build(
        config: Config,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        state: RuntimeState,
    ) -> Self {
        let config = Arc::new(config);
        let registry = StoreRegistry::new(storage, config.scope.clone());
        let state: RuntimeStateHandle = Arc::new(RwLock::new(state));
        let clients = Arc::new(ClientRegistry::new());

        let executor = StrategyExecutor::new(
            &config,
            registry.clone(),
            Arc::clone(&fetcher),
            Arc::clone(&clock),
            Arc::clone(&state),
        );
        let lifecycle = LifecycleManager::new(
            Arc::clone(&config),
            registry.clone(),
            fetcher,
            clock,
            Arc::clone(&clients),
            Arc::clone(&state),
        );

        Self {
            classifier: Classifier::from_config(&config),
            config,
            registry,
            executor,
            lifecycle,
            clients,
            state,
        }
    }

    /// A fresh instance for the configured version, waiting to install.
    pub fn new(config: Config, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let state = RuntimeState::new(config.version.clone());
        Self::build(config, storage, fetcher, Arc::new(SystemClock), state)
    }

    /// An instance restarted over an already-active version.
    pub fn resume(config: Config, storage: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let state = RuntimeState::resumed(config.version.clone());
        Self::build(config, storage, fetcher, Arc::new(SystemClock), state)
    }

    /// On-disk stores under the configured cache directory and the real network.
    pub fn open_disk(config: Config, resume: bool) -> anyhow::Result<Self> {
        config.validate()?;
        let storage = Arc::new(DiskStorage::new(config.cache_dir()?)?);
        let fetcher = Arc::new(HttpFetcher::new()?);
        Ok(if resume {
            Self::resume(config, storage, fetcher)
        } else {
            Self::new(config, storage, fetcher)
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub async fn state(&self) -> RuntimeState {
        self.state.read().await.clone()
    }

    pub async fn connect(&self) -> (ClientId, mpsc::Receiver<OutboundMessage>) {
        self.clients.connect().await
    }

    pub async fn controller(&self, client: ClientId) -> Option<String> {
        self.clients.controller(client).await
    }

    pub async fn install(&self) -> Result<()> {
        self.lifecycle.install().await
    }

    pub async fn activate(&self) -> Result<ActivationReport> {
        self.lifecycle.activate().await
    }

    /// Install, then activate straight away when install asked to skip waiting.
    pub async fn deploy(&self) -> Result<Option<ActivationReport>> {
        self.install().await?;
        if self.state.read().await.skip_waiting {
            return self.activate().await.map(Some);
        }
        Ok(None)
    }

    pub fn classify(&self, request: &RequestDescriptor) -> ResourceClass {
        self.classifier.classify(request)
    }

    pub async fn handle_fetch(&self, request: &RequestDescriptor) -> Handled {
        let class = self.classify(request);
        let handled = self.executor.execute(class, request).await;
        debug!(url = %request.url, %class, result = handled.result().kind(), "Request handled");
        handled
    }

    /// Handle a request and deliver its response immediately.
    pub async fn respond(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        self.handle_fetch(request).await.into_response()
    }

    pub async fn clear_all(&self) -> ClearReport {
        self.lifecycle.clear_all().await
    }

    pub async fn handle_message(&self, from: ClientId, message: InboundMessage) {
        match message {
            InboundMessage::ClearCaches => {
                info!(client = %from, "Clearing all caches on request");
                self.clear_all().await;
                self.clients.send(from, OutboundMessage::CachesCleared).await;
            }
            InboundMessage::GetVersion => {
                let version = self.state.read().await.version.clone();
                self.clients
                    .send(from, OutboundMessage::Version { version })
                    .await;
            }
        }
    }

    /// Parse and handle a raw JSON message. Unknown messages are logged and ignored.
    pub async fn handle_raw_message(&self, from: ClientId, raw: &str) {
        match InboundMessage::parse(raw) {
            Ok(message) => self.handle_message(from, message).await,
            Err(e) => warn!(client = %from, error = %e, "Ignoring unrecognized message"),
        }
    }

    pub async fn dispatch(&self, event: RuntimeEvent) -> Result<EventOutcome> {
        match event {
            RuntimeEvent::Install => {
                self.install().await?;
                Ok(EventOutcome::Installed)
            }
            RuntimeEvent::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            RuntimeEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.handle_fetch(&request).await)),
            RuntimeEvent::Message { from, message } => {
                self.handle_message(from, message).await;
                Ok(EventOutcome::MessageHandled)
            }
        }
    }
}
