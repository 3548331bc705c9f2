//! Marketplace connector abstraction: contract, registry, and the
//! rate-limited fetch wrapper.

pub mod contract;
pub mod limiter;
pub mod registry;

pub use contract::{Connector, ConnectorCredentials, ExternalItem, Page};
pub use limiter::{call_with_retry, RateLimiterMap, TokenBucket};
pub use registry::{ConnectorFactory, ConnectorRegistry};
