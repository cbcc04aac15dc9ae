//! The fetch orchestrator (spec §4.3): walks an ordered provider list,
//! enforcing budget, rate limits and the circuit breaker, recording a
//! `FetchAttempt` per call, and stopping at the first success.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sentinel_domain::model::{
    FetchAttempt, FetchOutcome, FetchRequest, FetchResult, ProviderKind, Rule, Schedule,
};
use sentinel_domain::repo::FetchAttemptRepo;
use tracing::{info, warn};
use uuid::Uuid;

use crate::budget::{BudgetCaps, BudgetGuard};
use crate::circuit_breaker::{CircuitBreaker, CircuitDecision};
use crate::rate_limit::{BucketLimits, RateLimiter};
use crate::traits::FetchProvider;

/// `OrchestratorConfig` (spec §4.3) plus the tier-resolved fields the
/// algorithm needs (preferred provider, disabled set, stop-after-preferred,
/// per-call timeout) — these arrive pre-resolved from `resolve_tier_policy`
/// so the orchestrator itself stays tier-agnostic.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_attempts_per_run: usize,
    pub allow_paid: bool,
    pub preferred_provider: Option<ProviderKind>,
    pub disabled_providers: HashSet<ProviderKind>,
    pub stop_after_preferred_failure: bool,
    pub timeout_ms: u64,
    /// When a paid provider would exceed a budget cap: `false` (the
    /// default) degrades to the next free provider in the walk order;
    /// `true` stops the run immediately instead. The spec names both
    /// knobs (§4.3.1) without pinning which is the default; "degrade" is
    /// the default here, documented in DESIGN.md as an Open Question
    /// resolution.
    pub hard_stop_on_budget_exceed: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_attempts_per_run: 8,
            allow_paid: false,
            preferred_provider: None,
            disabled_providers: HashSet::new(),
            stop_after_preferred_failure: false,
            timeout_ms: 30_000,
            hard_stop_on_budget_exceed: false,
        }
    }
}

pub struct OrchestratorOutcome {
    pub html: Option<String>,
    pub final_attempt: FetchResult,
    pub attempts: Vec<FetchResult>,
    pub raw_sample: Option<String>,
}

/// A rewrite the orchestrator tells the run processor to apply (spec
/// §4.3.2) — decided here, applied only by the caller (DESIGN.md's Open
/// Question resolution).
#[derive(Debug, Clone)]
pub struct ThrottleInstruction {
    pub original_schedule: Schedule,
    pub new_interval_seconds: u64,
}

/// Pure decision function: should this run's outcome trigger auto-throttle?
/// Never mutates `rule`; the caller applies the instruction.
pub fn decide_auto_throttle(rule: &Rule, final_attempt: &FetchResult) -> Option<ThrottleInstruction> {
    if rule.auto_throttle_disabled || rule.captcha_interval_enforced {
        return None;
    }
    if rule.effective_interval_seconds() >= 86_400 {
        return None;
    }
    if !final_attempt.provider.is_paid() || final_attempt.outcome != FetchOutcome::Ok {
        return None;
    }
    Some(ThrottleInstruction {
        original_schedule: rule.schedule,
        new_interval_seconds: 86_400,
    })
}

pub struct Orchestrator {
    registry: std::collections::HashMap<ProviderKind, Arc<dyn FetchProvider>>,
    rate_limiter: RateLimiter,
    circuit_breaker: CircuitBreaker,
    bucket_limits: BucketLimits,
}

impl Orchestrator {
    pub fn new(
        registry: std::collections::HashMap<ProviderKind, Arc<dyn FetchProvider>>,
        rate_limiter: RateLimiter,
        circuit_breaker: CircuitBreaker,
        bucket_limits: BucketLimits,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            circuit_breaker,
            bucket_limits,
        }
    }

    /// Compute the ordered provider list for this run (spec §4.3 step 1).
    fn ordered_providers(&self, config: &OrchestratorConfig) -> Vec<ProviderKind> {
        let mut order = Vec::new();

        if let Some(preferred) = config.preferred_provider {
            if !config.disabled_providers.contains(&preferred)
                && (!preferred.is_paid() || config.allow_paid)
            {
                order.push(preferred);
            }
        }

        for p in ProviderKind::default_free_order() {
            if !order.contains(&p) && !config.disabled_providers.contains(&p) {
                order.push(p);
            }
        }

        if config.allow_paid {
            for p in ProviderKind::default_paid_order() {
                if !order.contains(&p) && !config.disabled_providers.contains(&p) {
                    order.push(p);
                }
            }
        }

        order
    }

    /// `fetch(FetchRequest, OrchestratorConfig)` (spec §4.3).
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        config: &OrchestratorConfig,
        ledger: &dyn FetchAttemptRepo,
        budget_caps: BudgetCaps,
        workspace_id: Uuid,
        rule_id: Uuid,
        run_id: Uuid,
    ) -> OrchestratorOutcome {
        let order = self.ordered_providers(config);

        if let Some(preferred) = config.preferred_provider {
            let preferred_available = order.first() == Some(&preferred);
            if !preferred_available {
                let attempt = unavailable_result(preferred);
                return OrchestratorOutcome {
                    html: None,
                    final_attempt: attempt,
                    attempts: Vec::new(),
                    raw_sample: None,
                };
            }
        }

        let budget_guard = BudgetGuard::new(ledger, budget_caps);
        let mut attempts = Vec::new();

        for (idx, provider) in order.iter().enumerate() {
            if idx >= config.max_attempts_per_run {
                break;
            }
            let provider = *provider;

            if provider.is_paid() {
                let status = match budget_guard
                    .can_spend(provider, workspace_id, &request.domain, rule_id)
                    .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "budget guard lookup failed; treating as denied");
                        continue;
                    }
                };
                if !status.can_spend_paid {
                    info!(provider = %provider, reason = status.reason, "paid provider budget-blocked");
                    if config.hard_stop_on_budget_exceed {
                        let attempt = unavailable_result(provider);
                        return OrchestratorOutcome {
                            html: None,
                            final_attempt: attempt,
                            attempts,
                            raw_sample: None,
                        };
                    }
                    continue;
                }
            }

            match self.circuit_breaker.decide(&request.domain, provider).await {
                Ok(CircuitDecision::Skip) => continue,
                Ok(CircuitDecision::Proceed) => {}
                Err(e) => {
                    warn!(error = %e, "circuit breaker lookup failed; proceeding optimistically");
                }
            }

            let token = self
                .rate_limiter
                .consume_token(&request.domain, provider, self.bucket_limits)
                .await;
            let token = match token {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "rate limiter lookup failed; proceeding optimistically");
                    crate::rate_limit::TokenConsumption {
                        allowed: true,
                        remaining: 0.0,
                        retry_after_ms: 0,
                    }
                }
            };
            if !token.allowed {
                let attempt = FetchResult {
                    provider,
                    outcome: FetchOutcome::RateLimited,
                    http_status: None,
                    final_url: None,
                    body_text: None,
                    body_bytes: 0,
                    block_kind: None,
                    signals: vec![format!("retry_after_ms={}", token.retry_after_ms)],
                    cost_usd: 0.0,
                    latency_ms: 0,
                    country: None,
                };
                self.record(ledger, &attempt, run_id, workspace_id, rule_id, &request.domain)
                    .await;
                attempts.push(attempt.clone());
                return OrchestratorOutcome {
                    html: None,
                    final_attempt: attempt,
                    attempts,
                    raw_sample: None,
                };
            }

            let Some(adapter) = self.registry.get(&provider) else {
                continue;
            };

            let result = adapter.execute(request).await.unwrap_or_else(|e| FetchResult {
                provider,
                outcome: FetchOutcome::ProviderError,
                http_status: None,
                final_url: None,
                body_text: None,
                body_bytes: 0,
                block_kind: None,
                signals: vec![e.to_string()],
                cost_usd: 0.0,
                latency_ms: 0,
                country: None,
            });

            self.record(ledger, &result, run_id, workspace_id, rule_id, &request.domain)
                .await;

            if result.is_success() {
                let _ = self.circuit_breaker.record_success(&request.domain, provider).await;
                let raw_sample = result.body_text.clone();
                let html = result.body_text.clone();
                attempts.push(result.clone());
                return OrchestratorOutcome {
                    html,
                    final_attempt: result,
                    attempts,
                    raw_sample,
                };
            }

            let _ = self.circuit_breaker.record_failure(&request.domain, provider).await;
            let was_preferred = config.preferred_provider == Some(provider);
            attempts.push(result.clone());

            if was_preferred && config.stop_after_preferred_failure {
                return OrchestratorOutcome {
                    html: None,
                    final_attempt: result,
                    attempts,
                    raw_sample: None,
                };
            }
        }

        let final_attempt = attempts
            .last()
            .cloned()
            .unwrap_or_else(|| unavailable_result(ProviderKind::Http));

        OrchestratorOutcome {
            html: None,
            final_attempt,
            attempts,
            raw_sample: None,
        }
    }

    async fn record(
        &self,
        ledger: &dyn FetchAttemptRepo,
        result: &FetchResult,
        run_id: Uuid,
        workspace_id: Uuid,
        rule_id: Uuid,
        domain: &str,
    ) {
        let attempt = FetchAttempt {
            id: Uuid::new_v4(),
            run_id,
            workspace_id,
            rule_id: Some(rule_id),
            hostname: domain.to_string(),
            provider: result.provider,
            outcome: result.outcome,
            block_kind: result.block_kind,
            http_status: result.http_status,
            body_bytes: result.body_bytes,
            cost_usd: result.cost_usd,
            latency_ms: result.latency_ms,
            created_at: Utc::now(),
        };
        if let Err(e) = ledger.put(attempt).await {
            warn!(error = %e, "failed to write fetch attempt ledger row");
        }
    }
}

fn unavailable_result(provider: ProviderKind) -> FetchResult {
    FetchResult {
        provider,
        outcome: FetchOutcome::PreferredUnavailable,
        http_status: None,
        final_url: None,
        body_text: None,
        body_bytes: 0,
        block_kind: None,
        signals: Vec::new(),
        cost_usd: 0.0,
        latency_ms: 0,
        country: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::circuit_breaker::CircuitConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sentinel_domain::error::Result;
    use std::collections::HashMap as Map;

    struct FakeProvider {
        outcome: FetchOutcome,
    }

    #[async_trait]
    impl FetchProvider for FakeProvider {
        async fn execute(&self, _request: &FetchRequest) -> Result<FetchResult> {
            Ok(FetchResult {
                provider: ProviderKind::Http,
                outcome: self.outcome,
                http_status: Some(200),
                final_url: None,
                body_text: Some("<html>ok</html>".into()),
                body_bytes: 16,
                block_kind: None,
                signals: Vec::new(),
                cost_usd: 0.0,
                latency_ms: 1,
                country: None,
            })
        }
    }

    struct NullLedger {
        rows: Mutex<Vec<FetchAttempt>>,
    }

    #[async_trait]
    impl FetchAttemptRepo for NullLedger {
        async fn put(&self, attempt: FetchAttempt) -> Result<()> {
            self.rows.lock().push(attempt);
            Ok(())
        }
        async fn list_by_domain_since(
            &self,
            _domain: &str,
            _since: chrono::DateTime<Utc>,
        ) -> Result<Vec<FetchAttempt>> {
            Ok(Vec::new())
        }
        async fn list_by_workspace_since(
            &self,
            _workspace_id: Uuid,
            _since: chrono::DateTime<Utc>,
        ) -> Result<Vec<FetchAttempt>> {
            Ok(Vec::new())
        }
    }

    fn request() -> FetchRequest {
        FetchRequest {
            url: "https://example.com".into(),
            domain: "example.com".into(),
            user_agent: None,
            cookies: None,
            headers: Map::new(),
            render_wait_ms: 0,
            geo_country: None,
            timeout_ms: 5_000,
        }
    }

    fn orchestrator(outcome: FetchOutcome) -> Orchestrator {
        let mut registry: Map<ProviderKind, Arc<dyn FetchProvider>> = Map::new();
        registry.insert(ProviderKind::Http, Arc::new(FakeProvider { outcome }));
        let cache = Arc::new(InMemoryCache::new());
        Orchestrator::new(
            registry,
            RateLimiter::new(cache.clone()),
            CircuitBreaker::new(cache, CircuitConfig::default()),
            BucketLimits {
                capacity: 100.0,
                refill_per_sec: 10.0,
            },
        )
    }

    #[tokio::test]
    async fn successful_first_provider_stops_the_walk() {
        let orchestrator = orchestrator(FetchOutcome::Ok);
        let ledger = NullLedger { rows: Mutex::new(vec![]) };
        let outcome = orchestrator
            .fetch(
                &request(),
                &OrchestratorConfig {
                    preferred_provider: Some(ProviderKind::Http),
                    ..OrchestratorConfig::default()
                },
                &ledger,
                BudgetCaps::default(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
            )
            .await;
        assert!(outcome.final_attempt.is_success());
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn preferred_disabled_short_circuits_without_attempts() {
        let orchestrator = orchestrator(FetchOutcome::Ok);
        let ledger = NullLedger { rows: Mutex::new(vec![]) };
        let mut disabled = HashSet::new();
        disabled.insert(ProviderKind::Http);
        let outcome = orchestrator
            .fetch(
                &request(),
                &OrchestratorConfig {
                    preferred_provider: Some(ProviderKind::Http),
                    disabled_providers: disabled,
                    ..OrchestratorConfig::default()
                },
                &ledger,
                BudgetCaps::default(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                Uuid::new_v4(),
            )
            .await;
        assert_eq!(outcome.final_attempt.outcome, FetchOutcome::PreferredUnavailable);
        assert!(outcome.attempts.is_empty());
    }

    #[test]
    fn auto_throttle_only_fires_for_paid_success_on_sub_daily_rule() {
        use sentinel_domain::model::{
            ExtractionConfig, NormalizationConfig, PostProcessStep, PriceNormalization, RuleType,
            SelectorExtraction,
        };
        use sentinel_domain::model::AlertPolicy;

        let rule = Rule {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            name: "r".into(),
            rule_type: RuleType::Price,
            extraction: ExtractionConfig::Css(SelectorExtraction {
                selector: ".p".into(),
                attribute: None,
                post_process: Vec::<PostProcessStep>::new(),
                fallback_selectors: Vec::new(),
                extract_all: false,
            }),
            normalization: NormalizationConfig::Price(PriceNormalization::default()),
            alert_policy: AlertPolicy {
                conditions: Vec::new(),
                cooldown_seconds: 3600,
                channel_ids: Vec::new(),
            },
            schedule: Schedule {
                interval_seconds: 3600,
                jitter_seconds: 0,
            },
            require_consecutive: 2,
            enabled: true,
            screenshot_on_change: false,
            selector_fingerprint: None,
            schema_fingerprint: None,
            health_score: 100,
            last_error_code: None,
            last_error_at: None,
            next_run_at: Utc::now(),
            captcha_interval_enforced: false,
            original_schedule: None,
            auto_throttle_disabled: false,
            created_at: Utc::now(),
        };

        let success_paid = FetchResult {
            provider: ProviderKind::Brightdata,
            outcome: FetchOutcome::Ok,
            http_status: Some(200),
            final_url: None,
            body_text: None,
            body_bytes: 0,
            block_kind: None,
            signals: Vec::new(),
            cost_usd: 0.0015,
            latency_ms: 1,
            country: None,
        };

        let instruction = decide_auto_throttle(&rule, &success_paid).expect("should throttle");
        assert_eq!(instruction.new_interval_seconds, 86_400);

        let mut disabled_rule = rule.clone();
        disabled_rule.auto_throttle_disabled = true;
        assert!(decide_auto_throttle(&disabled_rule, &success_paid).is_none());
    }
}
