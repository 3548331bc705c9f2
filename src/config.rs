//! Configuration types.
//!
//! Everything is env-driven with sensible defaults so behavior can be tuned
//! without code changes. Priority thresholds live in the `sla_rules` table,
//! not here — this file only carries engine mechanics and floor values.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database path.
    pub db_path: String,
    pub sync: SyncConfig,
    pub sla: SlaConfig,
    pub linking: LinkConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("SELLER_INBOX_DB_PATH")
                .unwrap_or_else(|_| "./data/seller-inbox.db".to_string()),
            sync: SyncConfig::from_env(),
            sla: SlaConfig::from_env(),
            linking: LinkConfig::from_env(),
        }
    }
}

/// Sync orchestrator and rate limiter settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the scheduler ticks every (seller, channel) pair.
    pub sync_interval: Duration,
    /// Global bound on concurrently running sync units.
    pub max_concurrent_syncs: usize,
    /// Items requested per connector page.
    pub page_size: u32,
    /// Safety limit on pages per tick (guards against a misbehaving cursor).
    pub max_pages_per_tick: u32,
    /// Consecutive pair failures before an operational alert is raised.
    pub alert_after_errors: u32,
    /// Attempts to persist the watermark after a durable batch write.
    pub watermark_retries: u32,
    /// Retry/backoff policy for connector calls.
    pub retry: RetryConfig,
    /// Token bucket refill rate per (seller, marketplace), tokens/second.
    pub rate_limit_per_sec: u32,
    /// Token bucket burst capacity.
    pub rate_limit_burst: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(120),
            max_concurrent_syncs: 8,
            page_size: 50,
            max_pages_per_tick: 20,
            alert_after_errors: 5,
            watermark_retries: 5,
            retry: RetryConfig::default(),
            rate_limit_per_sec: 4,
            rate_limit_burst: 8,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sync_interval: Duration::from_secs(env_parse(
                "SELLER_INBOX_SYNC_INTERVAL_SECS",
                d.sync_interval.as_secs(),
            )),
            max_concurrent_syncs: env_parse("SELLER_INBOX_MAX_CONCURRENT_SYNCS", d.max_concurrent_syncs),
            page_size: env_parse("SELLER_INBOX_PAGE_SIZE", d.page_size),
            max_pages_per_tick: env_parse("SELLER_INBOX_MAX_PAGES", d.max_pages_per_tick),
            alert_after_errors: env_parse("SELLER_INBOX_ALERT_AFTER_ERRORS", d.alert_after_errors),
            watermark_retries: d.watermark_retries,
            retry: RetryConfig::default(),
            rate_limit_per_sec: env_parse("SELLER_INBOX_RATE_PER_SEC", d.rate_limit_per_sec),
            rate_limit_burst: env_parse("SELLER_INBOX_RATE_BURST", d.rate_limit_burst),
        }
    }
}

/// Retry/backoff policy for a single connector call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Hard per-call timeout.
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(20),
        }
    }
}

/// Priority/SLA floor values and sweep cadence.
#[derive(Debug, Clone)]
pub struct SlaConfig {
    /// Ratings at or below this force at least `high` priority.
    pub low_rating_threshold: i32,
    /// Unanswered items older than this are force-escalated to `urgent`.
    pub age_escalation: chrono::Duration,
    /// Chats with at least this many unread messages start at `high`.
    pub chat_unread_high: u32,
    /// Escalation sweep cadence.
    pub sweep_interval: Duration,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            low_rating_threshold: 2,
            age_escalation: chrono::Duration::hours(24),
            chat_unread_high: 3,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl SlaConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            low_rating_threshold: env_parse("SELLER_INBOX_LOW_RATING", d.low_rating_threshold),
            age_escalation: chrono::Duration::hours(env_parse(
                "SELLER_INBOX_AGE_ESCALATION_HOURS",
                d.age_escalation.num_hours(),
            )),
            chat_unread_high: env_parse("SELLER_INBOX_CHAT_UNREAD_HIGH", d.chat_unread_high),
            sweep_interval: Duration::from_secs(env_parse(
                "SELLER_INBOX_SWEEP_INTERVAL_SECS",
                d.sweep_interval.as_secs(),
            )),
        }
    }
}

/// Cross-channel linking settings.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Time window for the same-product deterministic match.
    pub product_window: chrono::Duration,
    /// Window scanned for probabilistic candidates.
    pub probabilistic_window: chrono::Duration,
    /// Probabilistic scores below this are discarded as noise.
    pub min_probabilistic_confidence: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            product_window: chrono::Duration::hours(72),
            probabilistic_window: chrono::Duration::days(14),
            min_probabilistic_confidence: 0.30,
        }
    }
}

impl LinkConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            product_window: chrono::Duration::hours(env_parse(
                "SELLER_INBOX_PRODUCT_WINDOW_HOURS",
                d.product_window.num_hours(),
            )),
            probabilistic_window: d.probabilistic_window,
            min_probabilistic_confidence: d.min_probabilistic_confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = SyncConfig::default();
        assert!(cfg.max_pages_per_tick > 0);
        assert!(cfg.retry.max_attempts > 0);
        assert!(cfg.rate_limit_burst >= cfg.rate_limit_per_sec);
    }

    #[test]
    fn sla_defaults() {
        let cfg = SlaConfig::default();
        assert_eq!(cfg.low_rating_threshold, 2);
        assert!(cfg.age_escalation > chrono::Duration::zero());
    }
}
