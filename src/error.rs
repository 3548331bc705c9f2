//! Error types for the seller inbox core.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Errors surfaced by marketplace connectors.
///
/// The retry policy in `connectors::limiter` branches on these variants:
/// `Transient`, `Timeout`, and `RateLimited` are retried, everything else
/// is returned to the caller immediately.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Call to {marketplace}/{operation} timed out after {timeout:?}")]
    Timeout {
        marketplace: String,
        operation: String,
        timeout: Duration,
    },

    #[error("Transient upstream failure: {reason}")]
    Transient { reason: String },

    #[error("Upstream rate limit hit, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed for {marketplace}: {reason}")]
    AuthFailed { marketplace: String, reason: String },

    #[error("Capability {capability} is not supported by this connector")]
    Unsupported { capability: &'static str },

    #[error("Malformed upstream payload: {reason}")]
    Malformed { reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ConnectorError {
    /// Whether the retry loop may attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Timeout { .. }
                | ConnectorError::Transient { .. }
                | ConnectorError::RateLimited { .. }
                | ConnectorError::Protocol(_)
        )
    }
}

/// Connector registry errors.
///
/// An unknown (marketplace, channel) pair is a configuration bug; a missing
/// credential is a runtime provisioning problem. Callers must be able to
/// tell them apart, so they are distinct variants.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No connector registered for {marketplace}/{channel}")]
    UnknownConnector { marketplace: String, channel: String },

    #[error("Missing credential {key} for {marketplace}")]
    MissingCredential { marketplace: String, key: String },

    #[error("Connector for {marketplace}/{channel} failed to build: {reason}")]
    BuildFailed {
        marketplace: String,
        channel: String,
        reason: String,
    },
}

/// Sync orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Page fetch failed after {attempts} attempts: {source}")]
    PageFetch {
        attempts: u32,
        #[source]
        source: ConnectorError,
    },

    #[error("Authentication is broken for this pair, sync stopped: {source}")]
    AuthBroken {
        #[source]
        source: ConnectorError,
    },

    #[error("Watermark could not be advanced after {attempts} attempts: {source}")]
    WatermarkStuck {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Store error during sync: {0}")]
    Store(#[from] StoreError),
}

/// Draft-generation seam errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Draft generator failed: {reason}")]
    GeneratorFailed { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
