//! Integration coverage for budget-driven provider fallback inside
//! `Orchestrator::fetch`: a paid preferred provider blocked by an
//! exhausted budget cap degrades to the next free provider in the
//! walk order instead of aborting the run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sentinel_domain::error::Result;
use sentinel_domain::model::{
    BlockKind, FetchAttempt, FetchOutcome, FetchRequest, FetchResult, ProviderKind,
};
use sentinel_domain::repo::FetchAttemptRepo;
use sentinel_providers::budget::BudgetCaps;
use sentinel_providers::cache::InMemoryCache;
use sentinel_providers::circuit_breaker::{CircuitBreaker, CircuitConfig};
use sentinel_providers::orchestrator::{Orchestrator, OrchestratorConfig};
use sentinel_providers::rate_limit::{BucketLimits, RateLimiter};
use sentinel_providers::traits::FetchProvider;
use uuid::Uuid;

struct ScriptedProvider {
    outcome: FetchOutcome,
    cost_usd: f64,
}

#[async_trait]
impl FetchProvider for ScriptedProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        Ok(FetchResult {
            provider: ProviderKind::Http,
            outcome: self.outcome,
            http_status: Some(200),
            final_url: Some(request.url.clone()),
            body_text: Some("<html></html>".into()),
            body_bytes: 14,
            block_kind: None::<BlockKind>,
            signals: Vec::new(),
            cost_usd: self.cost_usd,
            latency_ms: 10,
            country: None,
        })
    }
}

struct PanicProvider;

#[async_trait]
impl FetchProvider for PanicProvider {
    async fn execute(&self, _request: &FetchRequest) -> Result<FetchResult> {
        panic!("a budget-blocked provider must never reach its adapter");
    }
}

struct InMemoryLedger {
    attempts: Mutex<Vec<FetchAttempt>>,
}

impl InMemoryLedger {
    fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FetchAttemptRepo for InMemoryLedger {
    async fn put(&self, attempt: FetchAttempt) -> Result<()> {
        self.attempts.lock().push(attempt);
        Ok(())
    }

    async fn list_by_domain_since(&self, domain: &str, since: DateTime<Utc>) -> Result<Vec<FetchAttempt>> {
        Ok(self
            .attempts
            .lock()
            .iter()
            .filter(|a| a.hostname == domain && a.created_at >= since)
            .cloned()
            .collect())
    }

    async fn list_by_workspace_since(&self, workspace_id: Uuid, since: DateTime<Utc>) -> Result<Vec<FetchAttempt>> {
        Ok(self
            .attempts
            .lock()
            .iter()
            .filter(|a| a.workspace_id == workspace_id && a.created_at >= since)
            .cloned()
            .collect())
    }
}

fn exhausted_ledger(workspace_id: Uuid, domain: &str) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    ledger.attempts.lock().push(FetchAttempt {
        id: Uuid::new_v4(),
        run_id: Uuid::new_v4(),
        workspace_id,
        rule_id: None,
        hostname: domain.to_string(),
        provider: ProviderKind::Brightdata,
        outcome: FetchOutcome::Ok,
        block_kind: None,
        http_status: Some(200),
        body_bytes: 0,
        cost_usd: 999.0,
        latency_ms: 0,
        created_at: Utc::now(),
    });
    ledger
}

#[tokio::test]
async fn budget_blocked_preferred_provider_falls_through_to_free_provider() {
    let workspace_id = Uuid::new_v4();
    let rule_id = Uuid::new_v4();
    let domain = "example.com";

    let mut registry: HashMap<ProviderKind, Arc<dyn FetchProvider>> = HashMap::new();
    registry.insert(ProviderKind::Brightdata, Arc::new(PanicProvider));
    registry.insert(
        ProviderKind::Http,
        Arc::new(ScriptedProvider {
            outcome: FetchOutcome::Ok,
            cost_usd: 0.0,
        }),
    );

    let cache = Arc::new(InMemoryCache::new());
    let orchestrator = Orchestrator::new(
        registry,
        RateLimiter::new(cache.clone()),
        CircuitBreaker::new(cache, CircuitConfig::default()),
        BucketLimits::default(),
    );

    let request = FetchRequest {
        url: format!("https://{domain}/product/1"),
        domain: domain.to_string(),
        user_agent: None,
        cookies: None,
        headers: HashMap::new(),
        render_wait_ms: 0,
        geo_country: None,
        timeout_ms: 5_000,
    };

    let config = OrchestratorConfig {
        allow_paid: true,
        preferred_provider: Some(ProviderKind::Brightdata),
        ..OrchestratorConfig::default()
    };

    // Already over every cap, so the preferred paid provider is
    // budget-blocked on the first iteration.
    let ledger = exhausted_ledger(workspace_id, domain);
    let budget_caps = BudgetCaps {
        workspace_daily_usd: 1.0,
        domain_daily_usd: 1.0,
        rule_daily_usd: 1.0,
    };

    let outcome = orchestrator
        .fetch(&request, &config, &ledger, budget_caps, workspace_id, rule_id, Uuid::new_v4())
        .await;

    assert_eq!(outcome.final_attempt.provider, ProviderKind::Http);
    assert!(outcome.final_attempt.is_success());
    assert!(
        ledger.attempts.lock().len() >= 2,
        "expected the seeded attempt plus at least the successful fallback attempt"
    );
}

#[tokio::test]
async fn hard_stop_on_budget_exceed_aborts_instead_of_degrading() {
    let workspace_id = Uuid::new_v4();
    let rule_id = Uuid::new_v4();
    let domain = "example.com";

    let mut registry: HashMap<ProviderKind, Arc<dyn FetchProvider>> = HashMap::new();
    registry.insert(ProviderKind::Brightdata, Arc::new(PanicProvider));
    registry.insert(
        ProviderKind::Http,
        Arc::new(ScriptedProvider {
            outcome: FetchOutcome::Ok,
            cost_usd: 0.0,
        }),
    );

    let cache = Arc::new(InMemoryCache::new());
    let orchestrator = Orchestrator::new(
        registry,
        RateLimiter::new(cache.clone()),
        CircuitBreaker::new(cache, CircuitConfig::default()),
        BucketLimits::default(),
    );

    let request = FetchRequest {
        url: format!("https://{domain}/product/1"),
        domain: domain.to_string(),
        user_agent: None,
        cookies: None,
        headers: HashMap::new(),
        render_wait_ms: 0,
        geo_country: None,
        timeout_ms: 5_000,
    };

    let config = OrchestratorConfig {
        allow_paid: true,
        preferred_provider: Some(ProviderKind::Brightdata),
        hard_stop_on_budget_exceed: true,
        ..OrchestratorConfig::default()
    };

    let ledger = exhausted_ledger(workspace_id, domain);
    let budget_caps = BudgetCaps {
        workspace_daily_usd: 1.0,
        domain_daily_usd: 1.0,
        rule_daily_usd: 1.0,
    };

    let outcome = orchestrator
        .fetch(&request, &config, &ledger, budget_caps, workspace_id, rule_id, Uuid::new_v4())
        .await;

    assert_eq!(outcome.final_attempt.provider, ProviderKind::Brightdata);
    assert!(!outcome.final_attempt.is_success());
    assert!(outcome.attempts.is_empty(), "a hard stop returns before recording an attempt for the blocked provider");
}
