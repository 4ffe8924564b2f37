//! Offline resource cache.
//!
//! Intercepts outbound resource requests and decides per request whether to
//! answer from a local versioned store or from the network:
//!
//! - `classifier`: maps a request to its `ResourceClass`
//! - `strategy`: runs the caching strategy for that class
//! - `store`: named, versioned stores keyed by `(scope, version, class)`
//! - `expiry`: freshness stamps on short-lived entries
//! - `lifecycle`: install / activate / clear-all across deploys
//! - `runtime`: the facade tying it together for one deployed version

pub mod classifier;
pub mod clients;
pub mod clock;
pub mod config;
pub mod error;
pub mod expiry;
pub mod fetch;
pub mod lifecycle;
pub mod messages;
pub mod request;
pub mod runtime;
pub mod store;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::{Classifier, ResourceClass};
pub use config::Config;
pub use error::{CacheError, Result};
pub use lifecycle::{LifecyclePhase, RuntimeState};
pub use messages::{InboundMessage, OutboundMessage};
pub use request::{RequestDescriptor, ResponseSnapshot};
pub use runtime::{CacheRuntime, EventOutcome, RuntimeEvent};
pub use store::{StoreId, StoreRegistry};
pub use strategy::{Handled, StrategyResult};
