//! Per-`(domain, provider)` circuit breaker (spec §4.3 step 5), grounded on
//! the retrieval pack's `provider_health.rs` backoff/cooldown shape: a
//! consecutive-failure counter that opens the circuit, a cooldown window,
//! then a single half-open probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sentinel_domain::error::Result;
use sentinel_domain::model::ProviderKind;

use crate::cache::{Cache, CircuitState};

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// What the orchestrator should do for this provider right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Closed, or half-open and this call is the probe: proceed.
    Proceed,
    /// Open and still cooling down: skip this provider entirely.
    Skip,
}

pub struct CircuitBreaker {
    cache: Arc<dyn Cache>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(cache: Arc<dyn Cache>, config: CircuitConfig) -> Self {
        Self { cache, config }
    }

    fn key(domain: &str, provider: ProviderKind) -> String {
        format!("{domain}:{provider}")
    }

    pub async fn decide(&self, domain: &str, provider: ProviderKind) -> Result<CircuitDecision> {
        let key = Self::key(domain, provider);
        match self.cache.get_circuit(&key).await? {
            None | Some(CircuitState::Closed { .. }) | Some(CircuitState::HalfOpen) => {
                Ok(CircuitDecision::Proceed)
            }
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.cooldown {
                    self.cache.put_circuit(&key, CircuitState::HalfOpen).await?;
                    Ok(CircuitDecision::Proceed)
                } else {
                    Ok(CircuitDecision::Skip)
                }
            }
        }
    }

    pub async fn record_success(&self, domain: &str, provider: ProviderKind) -> Result<()> {
        let key = Self::key(domain, provider);
        self.cache
            .put_circuit(
                &key,
                CircuitState::Closed {
                    consecutive_failures: 0,
                },
            )
            .await
    }

    pub async fn record_failure(&self, domain: &str, provider: ProviderKind) -> Result<()> {
        let key = Self::key(domain, provider);
        let next = match self.cache.get_circuit(&key).await? {
            Some(CircuitState::Closed {
                consecutive_failures,
            }) => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    }
                } else {
                    CircuitState::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            Some(CircuitState::HalfOpen) | None => CircuitState::Open {
                opened_at: Instant::now(),
            },
            Some(open @ CircuitState::Open { .. }) => open,
        };
        self.cache.put_circuit(&key, next).await
    }
}
