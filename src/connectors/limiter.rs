//! Rate-limited fetch wrapper — token bucket plus retry/backoff.
//!
//! Every outbound connector call goes through [`call_with_retry`]: acquire
//! a token from the per-(seller, marketplace) bucket, apply a hard per-call
//! timeout, and retry transient failures with exponential backoff and
//! jitter. A rate-limit response is never retried immediately — it waits
//! the server's retry-after hint when one is given, otherwise the backoff
//! schedule.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::ConnectorError;

// ── Token bucket ────────────────────────────────────────────────────

/// Internal state, protected by a Mutex so refill and acquire are one
/// atomic read-modify-write.
#[derive(Debug)]
struct BucketState {
    /// Token count scaled by 1000 for sub-token precision.
    tokens_milli: u64,
    last_refill: Instant,
}

/// Token bucket shared by all channel units of one (seller, marketplace).
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    /// Tokens per second.
    rate: u32,
    /// Maximum token capacity.
    burst: u32,
}

impl TokenBucket {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens_milli: u64::from(burst) * 1000,
                last_refill: Instant::now(),
            }),
            rate: rate.max(1),
            burst: burst.max(1),
        }
    }

    /// Try to take one token. On failure returns how long to wait before
    /// a token will be available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().expect("token bucket mutex poisoned");

        let now = Instant::now();
        let elapsed_ms = now.duration_since(state.last_refill).as_millis() as u64;
        if elapsed_ms > 0 {
            let refill = elapsed_ms.saturating_mul(u64::from(self.rate));
            state.tokens_milli =
                (state.tokens_milli + refill).min(u64::from(self.burst) * 1000);
            state.last_refill = now;
        }

        if state.tokens_milli >= 1000 {
            state.tokens_milli -= 1000;
            Ok(())
        } else {
            let deficit = 1000 - state.tokens_milli;
            let wait_ms = deficit.div_ceil(u64::from(self.rate));
            Err(Duration::from_millis(wait_ms.max(1)))
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

/// Buckets keyed by (seller, marketplace), created lazily with one shared
/// rate/burst setting.
pub struct RateLimiterMap {
    buckets: Mutex<HashMap<(String, String), Arc<TokenBucket>>>,
    rate: u32,
    burst: u32,
}

impl RateLimiterMap {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate,
            burst,
        }
    }

    /// The bucket for one (seller, marketplace); all channel units of that
    /// seller share it.
    pub fn bucket(&self, seller_id: &str, marketplace: &str) -> Arc<TokenBucket> {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        buckets
            .entry((seller_id.to_string(), marketplace.to_string()))
            .or_insert_with(|| Arc::new(TokenBucket::new(self.rate, self.burst)))
            .clone()
    }
}

// ── Retry wrapper ───────────────────────────────────────────────────

/// Exponential backoff with jitter for the given (1-based) attempt.
fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let exp = policy
        .base_backoff
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(policy.max_backoff);
    let jitter_ms = exp.as_millis() as u64 / 2;
    let jitter = if jitter_ms > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    } else {
        Duration::ZERO
    };
    exp + jitter
}

/// Run one connector call through the bucket, timeout, and retry policy.
///
/// `op` names the call for logs; `f` builds a fresh future per attempt.
pub async fn call_with_retry<T, F, Fut>(
    bucket: &TokenBucket,
    policy: &RetryConfig,
    marketplace: &str,
    op: &str,
    mut f: F,
) -> Result<T, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut attempt = 0u32;
    loop {
        bucket.acquire().await;
        attempt += 1;

        let result = tokio::time::timeout(policy.call_timeout, f()).await;
        let err = match result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ConnectorError::Timeout {
                marketplace: marketplace.to_string(),
                operation: op.to_string(),
                timeout: policy.call_timeout,
            },
        };

        if !err.is_retryable() || attempt >= policy.max_attempts {
            if attempt > 1 {
                warn!(marketplace, op, attempt, error = %err, "Giving up on connector call");
            }
            return Err(err);
        }

        let delay = match &err {
            ConnectorError::RateLimited { retry_after: Some(hint) } => *hint,
            _ => backoff_delay(policy, attempt),
        };
        debug!(marketplace, op, attempt, delay_ms = delay.as_millis() as u64, error = %err,
            "Retrying connector call");
        tokio::time::sleep(delay).await;
    }
}
