//! Connector registry — explicit (marketplace, channel) → factory map.
//!
//! Registration happens once at process start; nothing registers itself
//! via import-time side effects, so the active roster is inspectable and
//! testable. Resolving an unknown pair is a configuration bug and fails
//! with a distinct error from a missing credential (a runtime auth
//! problem).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::contract::{Connector, ConnectorCredentials};
use crate::error::RegistryError;
use crate::model::Channel;

/// Builds a connector instance for one seller's credentials.
pub type ConnectorFactory =
    Box<dyn Fn(&ConnectorCredentials) -> Result<Arc<dyn Connector>, RegistryError> + Send + Sync>;

/// Lookup table of registered connector constructors.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<(String, Channel), ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a (marketplace, channel) pair. Replaces any
    /// previous registration for the same pair.
    pub fn register(
        &mut self,
        marketplace: impl Into<String>,
        channel: Channel,
        factory: ConnectorFactory,
    ) {
        let marketplace = marketplace.into();
        info!(marketplace = %marketplace, channel = %channel, "Connector registered");
        self.factories.insert((marketplace, channel), factory);
    }

    /// Build a connector for the pair with the given credentials.
    pub fn resolve(
        &self,
        marketplace: &str,
        channel: Channel,
        credentials: &ConnectorCredentials,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        let factory = self
            .factories
            .get(&(marketplace.to_string(), channel))
            .ok_or_else(|| RegistryError::UnknownConnector {
                marketplace: marketplace.to_string(),
                channel: channel.as_str().to_string(),
            })?;
        factory(credentials)
    }

    /// Registered (marketplace, channel) pairs, for startup logging.
    pub fn roster(&self) -> Vec<(String, Channel)> {
        let mut pairs: Vec<_> = self.factories.keys().cloned().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.as_str().cmp(b.1.as_str())));
        pairs
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
