//! Passthrough network fetch of intercepted requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::request::{RequestDescriptor, ResponseSnapshot};

/// Transport-level ceiling; strategies apply their own, shorter timeouts on top.
const CLIENT_TIMEOUT_SECS: u64 = 60;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Any HTTP status is a successful fetch; only transport failures are errors.
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot>;
}

/// Fetch with a bounded timeout. An elapsed timeout is a network failure.
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &RequestDescriptor,
    timeout: Duration,
) -> Result<ResponseSnapshot> {
    match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(url = %request.url, ?timeout, "Network request timed out");
            Err(CacheError::Timeout(timeout))
        }
    }
}

/// HTTP fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => warn!(header = %name, "Dropping invalid request header"),
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %request.url, status, bytes = body.len(), "Network fetch complete");
        Ok(ResponseSnapshot {
            status,
            headers,
            body,
        })
    }
}
