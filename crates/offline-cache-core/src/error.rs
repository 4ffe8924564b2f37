use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::LifecyclePhase;
use crate::store::StoreId;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Storage error in {store}: {message}")]
    Storage { store: StoreId, message: String },

    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Install failed for version {version}: {reason}")]
    Install { version: String, reason: String },

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecyclePhase,
        to: LifecyclePhase,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Raised by test fetchers and by transports that fail without a reqwest error.
    #[error("Fetch failed: {0}")]
    FetchFailed(String),
}

/// Maximum length for messages carried inside storage errors
const MAX_ERROR_MESSAGE_LENGTH: usize = 300;

impl CacheError {
    pub fn storage(store: &StoreId, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        let message = if message.len() <= MAX_ERROR_MESSAGE_LENGTH {
            message
        } else {
            let cut: String = message.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect();
            format!("{}... (truncated)", cut)
        };
        CacheError::Storage {
            store: store.clone(),
            message,
        }
    }

    /// True for failures of the network leg, which are eligible for store fallback.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            CacheError::Network(_) | CacheError::Timeout(_) | CacheError::FetchFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
