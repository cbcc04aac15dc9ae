mod alerting;
mod extraction;
mod maintenance;
mod normalization;
mod queue;
mod run_processor;
mod scheduler;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use async_trait::async_trait;
use sentinel_domain::config::{Config, ConfigSeverity};
use sentinel_domain::error::Result as DomainResult;
use sentinel_domain::repo::CooldownLock;
use sentinel_providers::adapters::{self, AdapterConfig};
use sentinel_providers::budget::BudgetCaps;
use sentinel_providers::cache::{BucketState, Cache, CircuitState, InMemoryCache, RedisCache};
use sentinel_providers::circuit_breaker::{CircuitBreaker, CircuitConfig};
use sentinel_providers::cost_table::ProviderCostTable;
use sentinel_providers::orchestrator::Orchestrator;
use sentinel_providers::rate_limit::{BucketLimits, RateLimiter};
use tracing_subscriber::EnvFilter;

use crate::maintenance::MaintenanceRunner;
use crate::queue::Queues;
use crate::run_processor::{NoopScreenshotSink, RunProcessor};
use crate::scheduler::Scheduler;
use crate::store::{
    JsonAlertRepo, JsonChannelRepo, JsonFetchAttemptRepo, JsonFetchProfileRepo, JsonRuleRepo,
    JsonRunRepo, JsonSourceRepo, JsonWorkspaceRepo,
};

/// Concurrency for the run-worker pool (spec §5).
const RUN_WORKER_CONCURRENCY: usize = 5;
/// Concurrency for the alert-dispatch pool (spec §5).
const ALERT_DISPATCH_CONCURRENCY: usize = 10;
/// How often idle workers poll their queue when nothing is ready.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Maintenance's own poll granularity; comfortably resolves a
/// minute-granularity daily schedule (spec §4.11).
const MAINTENANCE_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env();

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    tracing::info!("sentinel worker starting");

    let state_dir = std::path::PathBuf::from(&config.storage.state_dir);
    std::fs::create_dir_all(&state_dir).context("creating state_dir")?;

    // ── Repositories ──────────────────────────────────────────────────
    let workspace_repo = Arc::new(JsonWorkspaceRepo::new(&state_dir));
    let source_repo = Arc::new(JsonSourceRepo::new(&state_dir));
    let channel_repo = Arc::new(JsonChannelRepo::new(&state_dir));
    let fetch_profile_repo = Arc::new(JsonFetchProfileRepo::new(&state_dir));
    let rule_repo = Arc::new(JsonRuleRepo::new(&state_dir));
    let run_repo = Arc::new(JsonRunRepo::new(&state_dir));
    let alert_repo = Arc::new(JsonAlertRepo::new(&state_dir));
    let fetch_attempt_repo = Arc::new(JsonFetchAttemptRepo::new(&state_dir));
    tracing::info!(path = %state_dir.display(), "repositories ready");

    // ── Shared cache (rate limit buckets, circuit state, cooldown locks) ──
    // `CooldownLock` is satisfied by any `Cache` via a blanket impl, but a
    // `dyn Cache` can't coerce directly into a `dyn CooldownLock` object --
    // both handles are carved from the same concrete `CacheBackend` below
    // so each coercion starts from a sized type.
    let backend: Arc<CacheBackend> = match &config.storage.redis_url {
        Some(url) => {
            tracing::info!("using Redis-backed cache");
            Arc::new(CacheBackend::Redis(
                RedisCache::new(url).context("connecting to REDIS_URL")?,
            ))
        }
        None => {
            tracing::warn!("REDIS_URL not set; using single-process in-memory cache");
            Arc::new(CacheBackend::InMemory(InMemoryCache::new()))
        }
    };
    let cache: Arc<dyn Cache> = backend.clone();
    let cooldown_lock: Arc<dyn CooldownLock> = backend;

    // ── Provider adapters ────────────────────────────────────────────
    let adapter_config = AdapterConfig {
        headless: adapters::HeadlessConfig {
            base_url: env_or("HEADLESS_BASE_URL", "http://localhost:9222"),
        },
        flaresolverr: adapters::FlaresolverrConfig {
            base_url: env_or("FLARESOLVERR_BASE_URL", "http://localhost:8191"),
        },
        brightdata: adapters::BrightdataConfig {
            base_url: env_or("BRIGHTDATA_BASE_URL", "https://api.brightdata.com"),
            api_key: config.brightdata.api_key.clone(),
            zone: config.brightdata.zone.clone(),
        },
        scraping_browser: adapters::ScrapingBrowserConfig {
            base_url: env_or("SCRAPING_BROWSER_BASE_URL", "http://localhost:9223"),
            api_key: std::env::var("SCRAPING_BROWSER_API_KEY").ok(),
        },
        twocaptcha: adapters::TwocaptchaConfig {
            base_url: env_or("TWOCAPTCHA_BASE_URL", "https://2captcha.com"),
            api_key: std::env::var("TWOCAPTCHA_API_KEY").ok(),
        },
        cost_table: ProviderCostTable::defaults(),
    };
    let registry = adapters::build_registry(adapter_config);
    tracing::info!(providers = registry.len(), "provider registry ready");

    let rate_limiter = RateLimiter::new(cache.clone());
    let circuit_breaker = CircuitBreaker::new(cache.clone(), CircuitConfig::default());
    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        rate_limiter,
        circuit_breaker,
        BucketLimits::default(),
    ));

    let budget_caps = BudgetCaps {
        workspace_daily_usd: config.budget.daily_budget_usd_default,
        ..BudgetCaps::default()
    };

    // ── Work queues + run processor ──────────────────────────────────
    let queues = Queues::new();
    let processor = Arc::new(RunProcessor {
        workspace_repo: workspace_repo.clone(),
        source_repo: source_repo.clone(),
        fetch_profile_repo: fetch_profile_repo.clone(),
        rule_repo: rule_repo.clone(),
        run_repo: run_repo.clone(),
        alert_repo: alert_repo.clone(),
        fetch_attempt_repo: fetch_attempt_repo.clone(),
        cooldown_lock,
        orchestrator,
        budget_caps,
        queues: queues.clone(),
        screenshot_sink: Arc::new(NoopScreenshotSink),
    });
    tracing::info!("run processor ready");

    // ── Scheduler ─────────────────────────────────────────────────────
    let scheduler = Arc::new(Scheduler::new(
        rule_repo.clone(),
        source_repo.clone(),
        queues.clone(),
        config.scheduler.batch_size,
        Duration::from_millis(config.scheduler.tick_interval_ms),
    ));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    if config.scheduler.enabled {
        let scheduler_for_task = scheduler.clone();
        tokio::spawn(async move {
            scheduler_for_task.run(shutdown_rx).await;
        });
        tracing::info!(
            tick_interval_ms = config.scheduler.tick_interval_ms,
            batch_size = config.scheduler.batch_size,
            "scheduler started"
        );
    } else {
        tracing::warn!("SCHEDULER_ENABLED=false; no rules will be claimed");
    }

    // ── Run-worker pool ───────────────────────────────────────────────
    for worker_id in 0..RUN_WORKER_CONCURRENCY {
        let queues = queues.clone();
        let processor = processor.clone();
        tokio::spawn(async move {
            loop {
                match queues.rules_run.try_dequeue().await {
                    Some((_id, job, _attempt)) => {
                        processor.run(job).await;
                    }
                    None => tokio::time::sleep(QUEUE_POLL_INTERVAL).await,
                }
            }
        });
        tracing::debug!(worker_id, "run worker started");
    }
    tracing::info!(concurrency = RUN_WORKER_CONCURRENCY, "run-worker pool ready");

    // ── Alert-dispatch pool ───────────────────────────────────────────
    // Notification transports (email/webhook/Slack) are out of scope; this
    // pool only resolves channels and marks the alert as dispatched.
    for worker_id in 0..ALERT_DISPATCH_CONCURRENCY {
        let queues = queues.clone();
        let alert_repo = alert_repo.clone();
        let channel_repo = channel_repo.clone();
        tokio::spawn(async move {
            loop {
                match queues.alerts_dispatch.try_dequeue().await {
                    Some((_id, job, _attempt)) => {
                        dispatch_alert(job, alert_repo.as_ref(), channel_repo.as_ref()).await;
                    }
                    None => tokio::time::sleep(QUEUE_POLL_INTERVAL).await,
                }
            }
        });
        tracing::debug!(worker_id, "alert-dispatch worker started");
    }
    tracing::info!(concurrency = ALERT_DISPATCH_CONCURRENCY, "alert-dispatch pool ready");

    // ── Maintenance worker (concurrency 1) ────────────────────────────
    {
        let runner = Arc::new(MaintenanceRunner::new(run_repo.clone(), fetch_attempt_repo.clone()));
        tokio::spawn(async move {
            runner.run(MAINTENANCE_POLL_INTERVAL).await;
        });
        tracing::info!("maintenance worker started");
    }

    // ── Health endpoint ───────────────────────────────────────────────
    let app = Router::new().route("/healthz", get(|| async { "ok" }));
    let addr = format!("0.0.0.0:{}", config.worker.health_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding health endpoint to {addr}"))?;
    tracing::info!(addr = %addr, "health endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        })
        .await
        .context("axum server error")?;

    Ok(())
}

async fn dispatch_alert(
    job: queue::DispatchJob,
    alert_repo: &dyn sentinel_domain::repo::AlertRepo,
    channel_repo: &dyn sentinel_domain::repo::ChannelRepo,
) {
    let Some(mut alert) = alert_repo.get(job.alert_id).await.ok().flatten() else {
        return;
    };
    for channel_id in &job.channels {
        match channel_repo.get(*channel_id).await {
            Ok(Some(channel)) if channel.enabled => {
                tracing::info!(
                    alert_id = %job.alert_id,
                    channel_id = %channel_id,
                    kind = ?channel.kind,
                    "dispatching alert (transport not configured; logged only)"
                );
                alert.channels_sent.push(*channel_id);
            }
            Ok(Some(_)) => tracing::debug!(channel_id = %channel_id, "channel disabled; skipping"),
            _ => tracing::warn!(channel_id = %channel_id, "channel not found"),
        }
    }
    let _ = alert_repo.put(alert).await;
}

/// Picks between the in-memory and Redis cache implementations at startup
/// while giving callers one concrete type to coerce into either `dyn Cache`
/// or `dyn CooldownLock`.
enum CacheBackend {
    InMemory(InMemoryCache),
    Redis(RedisCache),
}

#[async_trait]
impl Cache for CacheBackend {
    async fn get_bucket(&self, key: &str) -> DomainResult<Option<BucketState>> {
        match self {
            CacheBackend::InMemory(c) => c.get_bucket(key).await,
            CacheBackend::Redis(c) => c.get_bucket(key).await,
        }
    }

    async fn put_bucket(&self, key: &str, state: BucketState) -> DomainResult<()> {
        match self {
            CacheBackend::InMemory(c) => c.put_bucket(key, state).await,
            CacheBackend::Redis(c) => c.put_bucket(key, state).await,
        }
    }

    async fn get_circuit(&self, key: &str) -> DomainResult<Option<CircuitState>> {
        match self {
            CacheBackend::InMemory(c) => c.get_circuit(key).await,
            CacheBackend::Redis(c) => c.get_circuit(key).await,
        }
    }

    async fn put_circuit(&self, key: &str, state: CircuitState) -> DomainResult<()> {
        match self {
            CacheBackend::InMemory(c) => c.put_circuit(key, state).await,
            CacheBackend::Redis(c) => c.put_circuit(key, state).await,
        }
    }

    async fn set_nx_ex(&self, key: &str, ttl_seconds: u64) -> DomainResult<bool> {
        match self {
            CacheBackend::InMemory(c) => c.set_nx_ex(key, ttl_seconds).await,
            CacheBackend::Redis(c) => c.set_nx_ex(key, ttl_seconds).await,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sentinel_worker=debug")),
        )
        .json()
        .init();
}
