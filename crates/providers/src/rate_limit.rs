//! Token-bucket rate limiting keyed by `(domain, providerKind)` (spec §4.1).

use std::sync::Arc;
use std::time::Instant;

use sentinel_domain::error::Result;
use sentinel_domain::model::ProviderKind;

use crate::cache::{BucketState, Cache};

/// Result of a `consume_token` call (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct TokenConsumption {
    pub allowed: bool,
    pub remaining: f64,
    pub retry_after_ms: u64,
}

/// Capacity and refill rate for one bucket key. Domain- or
/// provider-configured; callers supply the limits, the limiter only tracks
/// state.
#[derive(Debug, Clone, Copy)]
pub struct BucketLimits {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for BucketLimits {
    fn default() -> Self {
        BucketLimits {
            capacity: 5.0,
            refill_per_sec: 1.0,
        }
    }
}

pub struct RateLimiter {
    cache: Arc<dyn Cache>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub fn bucket_key(domain: &str, provider: ProviderKind) -> String {
        format!("{domain}:{provider}")
    }

    /// Attempt to take one token from the `(domain, provider)` bucket,
    /// refilling first according to elapsed time since the last refill.
    pub async fn consume_token(
        &self,
        domain: &str,
        provider: ProviderKind,
        limits: BucketLimits,
    ) -> Result<TokenConsumption> {
        let key = Self::bucket_key(domain, provider);
        let now = Instant::now();

        let mut state = self.cache.get_bucket(&key).await?.unwrap_or(BucketState {
            tokens: limits.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * limits.refill_per_sec).min(limits.capacity);
        state.last_refill = now;

        let consumption = if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            TokenConsumption {
                allowed: true,
                remaining: state.tokens,
                retry_after_ms: 0,
            }
        } else {
            let retry_after_ms = ((1.0 - state.tokens) / limits.refill_per_sec * 1000.0).ceil() as u64;
            TokenConsumption {
                allowed: false,
                remaining: state.tokens,
                retry_after_ms,
            }
        };

        self.cache.put_bucket(&key, state).await?;
        Ok(consumption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn starved_bucket_reports_retry_after() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let limits = BucketLimits {
            capacity: 1.0,
            refill_per_sec: 0.5,
        };
        let first = limiter
            .consume_token("example.com", ProviderKind::Http, limits)
            .await
            .unwrap();
        assert!(first.allowed);

        let second = limiter
            .consume_token("example.com", ProviderKind::Http, limits)
            .await
            .unwrap();
        assert!(!second.allowed);
        assert!(second.retry_after_ms > 0);
    }

    #[tokio::test]
    async fn distinct_providers_on_same_domain_have_separate_buckets() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()));
        let limits = BucketLimits {
            capacity: 1.0,
            refill_per_sec: 0.1,
        };
        assert!(
            limiter
                .consume_token("example.com", ProviderKind::Http, limits)
                .await
                .unwrap()
                .allowed
        );
        assert!(
            limiter
                .consume_token("example.com", ProviderKind::Headless, limits)
                .await
                .unwrap()
                .allowed
        );
    }
}
