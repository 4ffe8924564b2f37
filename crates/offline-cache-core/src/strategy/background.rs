//! Detached refresh of a critical entry after it was served from a store.
//!
//! The refresh may start fetching immediately, but its store write waits
//! until the cached response has been delivered: the delivery gate opens
//! when the owning `Handled` is delivered or dropped. Failures are logged
//! and never reach the caller.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::chain::ChainContext;
use crate::classifier::ResourceClass;
use crate::expiry::CacheEntry;
use crate::fetch::fetch_with_timeout;
use crate::request::RequestDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// The network answered with a status that is never stored
    NotStored(u16),
    Failed(String),
}

/// A spawned background refresh whose write is gated on delivery.
pub struct BackgroundRefresh {
    handle: JoinHandle<RefreshOutcome>,
    delivered: Option<oneshot::Sender<()>>,
}

impl BackgroundRefresh {
    pub(crate) fn spawn(
        ctx: ChainContext,
        request: RequestDescriptor,
        class: ResourceClass,
        timeout: Duration,
    ) -> Self {
        let (delivered_tx, delivered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let fetched = fetch_with_timeout(ctx.fetcher.as_ref(), &request, timeout).await;

            // Sender dropped or fired: either way the response is out
            let _ = delivered_rx.await;

            let response = match fetched {
                Ok(response) if response.is_success() => response,
                Ok(response) => {
                    debug!(url = %request.url, status = response.status, "Background refresh not stored");
                    return RefreshOutcome::NotStored(response.status);
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Background refresh failed");
                    return RefreshOutcome::Failed(e.to_string());
                }
            };

            let id = ctx.store_id(class);
            let entry = CacheEntry::new(request.cache_key(), response, ctx.clock.now());
            match ctx.registry.put(&id, entry).await {
                Ok(()) => {
                    debug!(url = %request.url, store = %id, "Background refresh stored");
                    RefreshOutcome::Updated
                }
                Err(e) => {
                    warn!(url = %request.url, store = %id, error = %e, "Background refresh write failed");
                    RefreshOutcome::Failed(e.to_string())
                }
            }
        });

        Self {
            handle,
            delivered: Some(delivered_tx),
        }
    }

    /// Open the delivery gate and detach into a joinable handle.
    pub(crate) fn release(mut self) -> RefreshHandle {
        if let Some(tx) = self.delivered.take() {
            let _ = tx.send(());
        }
        RefreshHandle {
            handle: self.handle,
        }
    }
}

/// Handle on a released refresh. Dropping it leaves the task running.
pub struct RefreshHandle {
    handle: JoinHandle<RefreshOutcome>,
}

impl RefreshHandle {
    pub async fn join(self) -> RefreshOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Background refresh task aborted");
                RefreshOutcome::Failed(e.to_string())
            }
        }
    }
}
