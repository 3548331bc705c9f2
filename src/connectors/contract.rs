//! Connector contract — the uniform capability interface every
//! marketplace/channel integration implements.
//!
//! Connectors are pure I/O adapters: they page through upstream items and
//! send approved replies. Normalization, priority, linking, and the
//! guardrail all live elsewhere. The engine is agnostic to the wire format
//! behind a connector (REST, pagination style, auth scheme).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::model::{Channel, Source};

// ── External item ───────────────────────────────────────────────────

/// One raw item as yielded by a connector, before normalization.
///
/// Connectors convert their native payloads into this struct; fields a
/// channel does not carry stay `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalItem {
    /// Channel-native id, stable across fetches.
    pub external_id: String,
    /// Message body / review text.
    pub text: String,
    /// Star rating (reviews only).
    pub rating: Option<i32>,
    /// Opaque attachment references.
    pub attachments: Vec<String>,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
    /// Unread message count (chats only).
    pub unread_count: u32,
    /// Whether the item already has a response upstream.
    pub answered: bool,
    /// Where the connector got this item from.
    pub source: Source,
    /// When the customer wrote it.
    pub occurred_at: DateTime<Utc>,
    /// Channel-specific metadata carried into the extension bag.
    pub metadata: serde_json::Value,
}

impl ExternalItem {
    /// Minimal constructor for the common fields; the rest default.
    pub fn new(external_id: impl Into<String>, text: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            external_id: external_id.into(),
            text: text.into(),
            rating: None,
            attachments: vec![],
            customer_id: None,
            customer_name: None,
            order_id: None,
            product_id: None,
            unread_count: 0,
            answered: false,
            source: Source::PrimaryApi,
            occurred_at,
            metadata: serde_json::Value::Null,
        }
    }
}

/// One page of items plus the resumption token for the next fetch.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<ExternalItem>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl Page {
    /// Terminal empty page.
    pub fn empty() -> Self {
        Self {
            items: vec![],
            next_cursor: None,
            has_more: false,
        }
    }
}

// ── Credentials ─────────────────────────────────────────────────────

/// Credentials handed to a connector factory at resolve time.
#[derive(Clone)]
pub struct ConnectorCredentials {
    pub seller_id: String,
    /// Marketplace API token or key.
    pub api_key: Option<SecretString>,
    /// Extra marketplace-specific settings (endpoints, shop ids).
    pub settings: serde_json::Value,
}

impl ConnectorCredentials {
    pub fn new(seller_id: impl Into<String>) -> Self {
        Self {
            seller_id: seller_id.into(),
            api_key: None,
            settings: serde_json::Value::Null,
        }
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }
}

impl std::fmt::Debug for ConnectorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorCredentials")
            .field("seller_id", &self.seller_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Connector trait ─────────────────────────────────────────────────

/// Capability interface for one (marketplace, channel) integration.
///
/// Only `list_items` is required. Optional capabilities default to an
/// explicit [`ConnectorError::Unsupported`] so a missing capability is a
/// distinct signal, never a silent no-op.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Marketplace identity, e.g. "amazon", "ebay".
    fn marketplace(&self) -> &str;

    /// Channel identity.
    fn channel(&self) -> Channel;

    /// Fetch one page of items. Required.
    async fn list_items(&self, cursor: Option<&str>, page_size: u32)
        -> Result<Page, ConnectorError>;

    /// Send a reply to an item. Optional.
    async fn send_reply(&self, _item_id: &str, _text: &str) -> Result<(), ConnectorError> {
        Err(ConnectorError::Unsupported { capability: "send_reply" })
    }

    /// Mark an item read upstream. Optional.
    async fn mark_read(&self, _item_id: &str) -> Result<bool, ConnectorError> {
        Err(ConnectorError::Unsupported { capability: "mark_read" })
    }

    /// Cursor-based incremental updates. Optional; connectors without a
    /// change feed fall back to `list_items` paging.
    async fn get_updates(&self, _since_cursor: &str, _limit: u32) -> Result<Page, ConnectorError> {
        Err(ConnectorError::Unsupported { capability: "get_updates" })
    }
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("marketplace", &self.marketplace())
            .field("channel", &self.channel())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ListOnlyConnector;

    #[async_trait]
    impl Connector for ListOnlyConnector {
        fn marketplace(&self) -> &str {
            "testmarket"
        }

        fn channel(&self) -> Channel {
            Channel::Review
        }

        async fn list_items(
            &self,
            _cursor: Option<&str>,
            _page_size: u32,
        ) -> Result<Page, ConnectorError> {
            Ok(Page::empty())
        }
    }

    #[tokio::test]
    async fn optional_capabilities_surface_unsupported() {
        let c = ListOnlyConnector;
        let err = c.send_reply("x", "hi").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Unsupported { capability: "send_reply" }));

        let err = c.mark_read("x").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Unsupported { capability: "mark_read" }));

        let err = c.get_updates("c0", 10).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Unsupported { capability: "get_updates" }));
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let creds = ConnectorCredentials::new("s1").with_api_key(SecretString::from("topsecret"));
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("redacted"));
    }
}
