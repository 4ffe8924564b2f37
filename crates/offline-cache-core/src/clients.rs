//! Clients connected to the runtime.
//!
//! Each client gets an mpsc channel for outbound messages and records which
//! version currently controls it. Activation claims every client at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::messages::OutboundMessage;

/// Buffer size for each client's message channel.
/// Clients only ever receive a handful of lifecycle messages.
const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct Client {
    controller: Option<String>,
    tx: mpsc::Sender<OutboundMessage>,
}

#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: RwLock<HashMap<ClientId, Client>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. It starts uncontrolled until the next claim.
    pub async fn connect(&self) -> (ClientId, mpsc::Receiver<OutboundMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        self.clients.write().await.insert(
            id,
            Client {
                controller: None,
                tx,
            },
        );
        debug!(client = %id, "Client connected");
        (id, rx)
    }

    pub async fn disconnect(&self, id: ClientId) {
        self.clients.write().await.remove(&id);
    }

    pub async fn controller(&self, id: ClientId) -> Option<String> {
        self.clients
            .read()
            .await
            .get(&id)
            .and_then(|c| c.controller.clone())
    }

    /// Take control of every connected client; returns how many were claimed.
    pub async fn claim(&self, version: &str) -> usize {
        let mut clients = self.clients.write().await;
        for client in clients.values_mut() {
            client.controller = Some(version.to_string());
        }
        clients.len()
    }

    /// Send to one client without waiting. A full buffer drops the message,
    /// a closed channel drops the client.
    pub async fn send(&self, id: ClientId, message: OutboundMessage) -> bool {
        let tx = match self.clients.read().await.get(&id) {
            Some(client) => client.tx.clone(),
            None => {
                warn!(client = %id, "Message for unknown client dropped");
                return false;
            }
        };

        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(client = %id, ?message, "Client not draining messages - dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(client = %id, "Failed to send message - channel closed");
                self.disconnect(id).await;
                false
            }
        }
    }

    /// Send to every client; returns how many received it.
    pub async fn broadcast(&self, message: OutboundMessage) -> usize {
        let ids: Vec<ClientId> = self.clients.read().await.keys().copied().collect();
        let mut delivered = 0;
        for id in ids {
            if self.send(id, message.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_sets_controller_on_all_clients() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = registry.connect().await;
        let (b, _rx_b) = registry.connect().await;

        assert_eq!(registry.controller(a).await, None);
        assert_eq!(registry.claim("v2").await, 2);
        assert_eq!(registry.controller(a).await.as_deref(), Some("v2"));
        assert_eq!(registry.controller(b).await.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_broadcast_skips_and_drops_closed_clients() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_a) = registry.connect().await;
        let (_b, rx_b) = registry.connect().await;
        drop(rx_b);

        let delivered = registry.broadcast(OutboundMessage::CachesCleared).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_a.recv().await, Some(OutboundMessage::CachesCleared));
        assert_eq!(registry.claim("v2").await, 1);
    }

    #[tokio::test]
    async fn test_full_client_does_not_block_others() {
        let registry = ClientRegistry::new();
        let (stalled, _rx_stalled) = registry.connect().await;
        let (_live, mut rx_live) = registry.connect().await;

        for _ in 0..CHANNEL_BUFFER_SIZE {
            assert!(registry.send(stalled, OutboundMessage::CachesCleared).await);
        }
        assert!(!registry.send(stalled, OutboundMessage::CachesCleared).await);

        let delivered = registry.broadcast(OutboundMessage::CachesCleared).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_live.recv().await, Some(OutboundMessage::CachesCleared));
        // Still connected, only the message was dropped
        assert_eq!(registry.claim("v2").await, 2);
    }
}
