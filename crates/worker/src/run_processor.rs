//! The run processor (spec §4.9): turns one `RunJob` into a finished `Run`,
//! an `Observation`, and — when the anti-flap state machine confirms a
//! change — a dedupe-checked `Alert` and a dispatch job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use sentinel_domain::error::ErrorCode;
use sentinel_domain::model::{
    classify_change_kind, Alert, FetchOutcome, FetchRequest, Observation, Run, RunStatus,
};
use sentinel_domain::repo::{
    AlertRepo, CooldownLock, FetchAttemptRepo, FetchProfileRepo, RuleRepo, RunRepo, SourceRepo,
    WorkspaceRepo,
};
use sentinel_domain::util::sha256_hex;
use sentinel_providers::budget::BudgetCaps;
use sentinel_providers::orchestrator::{decide_auto_throttle, Orchestrator, OrchestratorConfig};
use sentinel_providers::tier_policy::resolve_tier_policy;
use uuid::Uuid;

use crate::alerting;
use crate::extraction;
use crate::normalization;
use crate::queue::{DispatchJob, JobOptions, Queues, RunJob, RunTrigger};

/// Width of the screenshot crop padding around the matched element (spec
/// §4.9 item 10). The render/upload step itself is an external
/// collaborator — see [`ScreenshotSink`].
pub const SCREENSHOT_PADDING_PX: u32 = 189;
pub const SCREENSHOT_JPEG_QUALITY: u8 = 80;

/// Render-and-upload collaborator for `screenshotOnChange` rules (spec
/// §4.9 item 10). The worker only decides *whether* a screenshot should be
/// taken; actually rendering and storing the image is out of scope the
/// same way raw page bodies are (spec §1 Non-goals), so the default
/// implementation is a no-op.
#[async_trait::async_trait]
pub trait ScreenshotSink: Send + Sync {
    async fn capture(&self, run_id: Uuid, url: &str) -> Option<String>;
}

pub struct NoopScreenshotSink;

#[async_trait::async_trait]
impl ScreenshotSink for NoopScreenshotSink {
    async fn capture(&self, _run_id: Uuid, _url: &str) -> Option<String> {
        None
    }
}

/// Everything the run processor needs, wired once at bootstrap and cloned
/// cheaply per job.
#[derive(Clone)]
pub struct RunProcessor {
    pub workspace_repo: Arc<dyn WorkspaceRepo>,
    pub source_repo: Arc<dyn SourceRepo>,
    pub fetch_profile_repo: Arc<dyn FetchProfileRepo>,
    pub rule_repo: Arc<dyn RuleRepo>,
    pub run_repo: Arc<dyn RunRepo>,
    pub alert_repo: Arc<dyn AlertRepo>,
    pub fetch_attempt_repo: Arc<dyn FetchAttemptRepo>,
    pub cooldown_lock: Arc<dyn CooldownLock>,
    pub orchestrator: Arc<Orchestrator>,
    pub budget_caps: BudgetCaps,
    pub queues: Queues,
    pub screenshot_sink: Arc<dyn ScreenshotSink>,
}

/// What happened to a job once the pipeline returned (for logging/tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    ReEnqueuedRateLimited,
    ReEnqueuedTimeout,
    SkippedMissingOrDisabled,
}

impl RunProcessor {
    pub async fn run(&self, job: RunJob) -> RunOutcome {
        let Some(mut rule) = self.rule_repo.get(job.rule_id).await.ok().flatten() else {
            return RunOutcome::SkippedMissingOrDisabled;
        };
        if !rule.enabled {
            return RunOutcome::SkippedMissingOrDisabled;
        }
        let Some(source) = self.source_repo.get(rule.source_id).await.ok().flatten() else {
            return RunOutcome::SkippedMissingOrDisabled;
        };
        let profile = match source.fetch_profile_id {
            Some(id) => self.fetch_profile_repo.get(id).await.ok().flatten(),
            None => None,
        };
        let Some(workspace) = self.workspace_repo.get(rule.workspace_id).await.ok().flatten() else {
            return RunOutcome::SkippedMissingOrDisabled;
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut run = Run {
            id: run_id,
            rule_id: rule.id,
            workspace_id: rule.workspace_id,
            started_at,
            finished_at: None,
            fetch_mode_used: profile.as_ref().map(|p| p.mode),
            provider_used: None,
            fetch_outcome: None,
            http_status: None,
            error_code: None,
            error_detail: None,
            block_detected: false,
            content_hash: None,
            screenshot_path: None,
            raw_sample: None,
            cost_usd: 0.0,
            status: RunStatus::Running,
            observation: None,
        };
        let _ = self.run_repo.put(run.clone()).await;

        let policy = profile
            .as_ref()
            .map(resolve_tier_policy)
            .unwrap_or_default();

        let request = FetchRequest {
            url: source.url.clone(),
            domain: source.domain.clone(),
            user_agent: profile.as_ref().and_then(|p| p.user_agent.clone()),
            cookies: profile.as_ref().and_then(|p| p.cookies.clone()),
            headers: profile.as_ref().map(|p| p.headers.clone()).unwrap_or_default(),
            render_wait_ms: profile.as_ref().map(|p| p.render_wait_ms).unwrap_or(0),
            geo_country: policy.geo_country.clone(),
            timeout_ms: policy.timeout_ms,
        };

        let orchestrator_config = OrchestratorConfig {
            max_attempts_per_run: 8,
            allow_paid: policy.allow_paid,
            preferred_provider: policy.preferred_provider,
            disabled_providers: policy.disabled_providers.clone(),
            stop_after_preferred_failure: policy.stop_after_preferred_failure,
            timeout_ms: policy.timeout_ms,
            hard_stop_on_budget_exceed: false,
        };

        let outcome = self
            .orchestrator
            .fetch(
                &request,
                &orchestrator_config,
                self.fetch_attempt_repo.as_ref(),
                self.budget_caps,
                rule.workspace_id,
                rule.id,
                run_id,
            )
            .await;

        run.provider_used = Some(outcome.final_attempt.provider);
        run.fetch_outcome = Some(outcome.final_attempt.outcome);
        run.http_status = outcome.final_attempt.http_status;
        run.block_detected = outcome.final_attempt.block_kind.is_some();
        run.cost_usd = outcome.attempts.iter().map(|a| a.cost_usd).sum();

        if let Some(instruction) = decide_auto_throttle(&rule, &outcome.final_attempt) {
            // Persisted immediately (not deferred to the end-of-run put
            // below) so it lands even on the error branches that return
            // early via `finish_with_error`; also folded into the local
            // `rule` so the later success-path put doesn't clone the
            // pre-throttle copy and revert it.
            rule.captcha_interval_enforced = true;
            rule.original_schedule = Some(instruction.original_schedule);
            rule.schedule.interval_seconds = instruction.new_interval_seconds;
            let _ = self.rule_repo.put(rule.clone()).await;
        }

        match outcome.final_attempt.outcome {
            FetchOutcome::RateLimited => {
                if job.rate_limit_retry_count <= 2 {
                    run.error_code = Some(ErrorCode::RateLimitedDeferred);
                    run.status = RunStatus::Failed;
                    run.finished_at = Some(Utc::now());
                    let _ = self.run_repo.put(run).await;
                    self.reenqueue_rate_limited(job).await;
                    return RunOutcome::ReEnqueuedRateLimited;
                }
                return self.finish_with_error(rule.id, run, ErrorCode::RateLimitedMaxRetries).await;
            }
            FetchOutcome::Timeout => {
                if job.timeout_retry_count <= 1 {
                    run.error_code = Some(ErrorCode::TimeoutRetryScheduled);
                    run.status = RunStatus::Failed;
                    run.finished_at = Some(Utc::now());
                    let _ = self.run_repo.put(run).await;
                    self.reenqueue_timeout(job).await;
                    return RunOutcome::ReEnqueuedTimeout;
                }
                return self.finish_with_error(rule.id, run, ErrorCode::FetchTimeout).await;
            }
            FetchOutcome::PreferredUnavailable => {
                return self
                    .finish_with_error(rule.id, run, ErrorCode::PreferredProviderUnavailable)
                    .await;
            }
            FetchOutcome::Ok => {}
            _ => {
                let code = classify_fetch_outcome(outcome.final_attempt.outcome);
                return self.finish_with_error(rule.id, run, code).await;
            }
        }

        let Some(html) = outcome.html else {
            return self.finish_with_error(rule.id, run, ErrorCode::ParseError).await;
        };

        let state = self.rule_repo.get_state(rule.id).await.ok().flatten();
        let fingerprint = rule.selector_fingerprint.as_ref();

        let extracted = match extraction::extract(&rule.extraction, &html, fingerprint) {
            Ok(e) => e,
            Err(_) => {
                let code = match &rule.extraction {
                    sentinel_domain::model::ExtractionConfig::Schema(_) => ErrorCode::ExtractSchemaNotFound,
                    _ => ErrorCode::ExtractSelectorNotFound,
                };
                return self.finish_with_error(rule.id, run, code).await;
            }
        };

        if let Some(fp) = extracted.updated_selector_fingerprint.clone() {
            rule.selector_fingerprint = Some(fp);
        }

        if let Some(meta) = extracted.schema_meta.as_ref() {
            self.handle_schema_drift(&rule, run_id, meta).await;
            // The stored fingerprint is the original baseline, set once on
            // first sighting and left alone afterward — not advanced to
            // the latest shape on every run. That way a shape that stays
            // drifted across several runs keeps comparing against the same
            // baseline and keeps colliding on the same dedupe key, which is
            // what makes `upsert_by_dedupe_key` refresh rather than insert.
            if rule.schema_fingerprint.is_none() {
                rule.schema_fingerprint = Some(meta.fingerprint.clone());
            }
        }

        let (schema_currency, schema_cents_variant) = extracted
            .schema_meta
            .as_ref()
            .map(|m| (m.currency.clone(), m.cents_variant))
            .unwrap_or((None, None));

        let normalized = match normalization::normalize(
            &rule.normalization,
            &extracted.raw,
            schema_currency.as_deref(),
            schema_cents_variant,
        ) {
            Ok(v) => v,
            Err(_) => return self.finish_with_error(rule.id, run, ErrorCode::ParseError).await,
        };

        let mut state = state.unwrap_or_else(|| sentinel_domain::model::RuleState::new(rule.id));
        let mut previous_stable = state.last_stable.clone();
        let mut expected_version = state.version;
        let mut change_confirmed = state.observe(normalized.clone(), rule.require_consecutive);
        state.version += 1;
        state.last_run_at = Some(Utc::now());

        // Every retry re-observes against the freshly-fetched state, so
        // `change_confirmed`/`previous_stable` always reflect whichever
        // state the CAS write actually (or last attempted to) land on,
        // not the pre-conflict guess.
        let mut cas_state = state.clone();
        let mut retries = 0;
        loop {
            match self
                .rule_repo
                .compare_and_swap_state(rule.id, expected_version, cas_state.clone())
                .await
            {
                Ok(()) => break,
                Err(_) if retries < 3 => {
                    retries += 1;
                    if let Some(mut fresh) = self.rule_repo.get_state(rule.id).await.ok().flatten() {
                        previous_stable = fresh.last_stable.clone();
                        expected_version = fresh.version;
                        change_confirmed = fresh.observe(normalized.clone(), rule.require_consecutive);
                        fresh.version += 1;
                        fresh.last_run_at = Some(Utc::now());
                        cas_state = fresh;
                    }
                }
                Err(_) => break,
            }
        }

        let change_kind = if change_confirmed {
            Some(classify_change_kind(previous_stable.as_ref(), &normalized))
        } else {
            None
        };

        let observation = Observation {
            run_id,
            rule_id: rule.id,
            extracted_raw: Some(extracted.raw.clone()),
            extracted_normalized: Some(normalized.clone()),
            change_detected: change_confirmed,
            change_kind,
            diff_summary: change_kind.map(|k| format!("{k:?}")),
            extracted_at: Utc::now(),
        };

        run.content_hash = Some(sha256_hex(&extracted.raw));
        run.raw_sample = if job.debug { Some(html.clone()) } else { None };
        run.status = RunStatus::Succeeded;
        run.finished_at = Some(Utc::now());
        run.observation = Some(observation);

        // A single consolidated put carrying every in-memory mutation this
        // run accumulated (selector heal, schema fingerprint, health
        // delta, error-clear) — cloning from `rule` earlier and putting
        // piecemeal would let the last writer silently revert the others.
        let penalty_delta = if change_confirmed { 2 } else { 0 };
        rule.apply_health_delta(penalty_delta);
        rule.last_error_code = None;
        rule.last_error_at = None;
        let _ = self.rule_repo.put(rule.clone()).await;

        let _ = self.run_repo.put(run.clone()).await;

        if change_confirmed {
            self.handle_alert(&rule, run_id, previous_stable.as_ref(), &normalized).await;

            if rule.screenshot_on_change {
                if let Some(path) = self.screenshot_sink.capture(run_id, &source.url).await {
                    let mut with_screenshot = run.clone();
                    with_screenshot.screenshot_path = Some(path);
                    let _ = self.run_repo.put(with_screenshot).await;
                }
            }
        }

        let _ = workspace;
        RunOutcome::Finished
    }

    async fn handle_alert(
        &self,
        rule: &sentinel_domain::model::Rule,
        run_id: Uuid,
        previous: Option<&sentinel_domain::model::NormalizedValue>,
        normalized: &sentinel_domain::model::NormalizedValue,
    ) {
        let evaluation = alerting::evaluate_conditions(&rule.alert_policy.conditions, previous, normalized);
        if evaluation.triggered.is_empty() {
            return;
        }

        let condition_ids: Vec<String> = evaluation.triggered.iter().map(|c| c.id.clone()).collect();
        let now = Utc::now();
        let workspace_tz = parse_workspace_tz(self.workspace_repo.as_ref(), rule.workspace_id).await;
        let dedupe_key = alerting::generate_dedupe_key(rule.id, &condition_ids, normalized, workspace_tz, now);

        if alerting::already_fired(
            self.alert_repo.as_ref(),
            rule.id,
            &condition_ids,
            normalized,
            workspace_tz,
            now,
        )
        .await
        .unwrap_or(false)
        {
            return;
        }

        if !alerting::try_cooldown(self.cooldown_lock.as_ref(), rule.id, rule.alert_policy.cooldown_seconds).await {
            return;
        }

        let severity = evaluation
            .highest_severity
            .unwrap_or(sentinel_domain::model::Severity::Low);
        let alert = Alert {
            id: Uuid::new_v4(),
            workspace_id: rule.workspace_id,
            rule_id: rule.id,
            run_id,
            triggered_at: now,
            severity,
            alert_type: alert_type_for(&evaluation.triggered[0].kind),
            title: format!("{} changed", rule.name),
            body: format!("{} now observes {:?}", rule.name, normalized),
            metadata: HashMap::new(),
            dedupe_key: dedupe_key.clone(),
            channels_sent: Vec::new(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        };

        let alert_id = alert.id;
        if self.alert_repo.put(alert).await.is_err() {
            return;
        }

        if !rule.alert_policy.channel_ids.is_empty() {
            let job = DispatchJob {
                alert_id,
                workspace_id: rule.workspace_id,
                rule_id: rule.id,
                channels: rule.alert_policy.channel_ids.clone(),
                dedupe_key,
            };
            self.queues
                .alerts_dispatch
                .enqueue(alert_id, job, JobOptions::default())
                .await;
        }
    }

    /// Schema-drift detection (spec §4.5): a changed `shapeHash` or
    /// block-count since the rule's stored `schema_fingerprint` emits a
    /// schema-drift alert with its own dedupe-key format
    /// (`schema_drift:<ruleId>:<shapeHash>`), independent of the anti-flap
    /// condition-evaluator pipeline. A repeat of the same hash refreshes
    /// `triggered_at` instead of inserting a new row (`upsert_by_dedupe_key`).
    /// First sighting (no stored fingerprint yet) never alerts.
    async fn handle_schema_drift(
        &self,
        rule: &sentinel_domain::model::Rule,
        run_id: Uuid,
        meta: &sentinel_domain::model::SchemaExtractMeta,
    ) {
        let Some(previous) = rule.schema_fingerprint.as_ref() else {
            return;
        };
        let drifted = previous.shape_hash != meta.fingerprint.shape_hash
            || previous.block_count != meta.fingerprint.block_count;
        if !drifted {
            return;
        }

        let dedupe_key = format!("schema_drift:{}:{}", rule.id, meta.fingerprint.shape_hash);
        let alert = Alert {
            id: Uuid::new_v4(),
            workspace_id: rule.workspace_id,
            rule_id: rule.id,
            run_id,
            triggered_at: Utc::now(),
            severity: sentinel_domain::model::Severity::Medium,
            alert_type: "schema_drift".into(),
            title: format!("{} schema drift detected", rule.name),
            body: format!(
                "shape hash changed from {} to {}",
                previous.shape_hash, meta.fingerprint.shape_hash
            ),
            metadata: HashMap::new(),
            dedupe_key,
            channels_sent: Vec::new(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        };
        let _ = self.alert_repo.upsert_by_dedupe_key(alert).await;
    }

    async fn finish_with_error(&self, rule_id: Uuid, mut run: Run, code: ErrorCode) -> RunOutcome {
        run.error_code = Some(code);
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        let _ = self.run_repo.put(run).await;

        if let Some(mut rule) = self.rule_repo.get(rule_id).await.ok().flatten() {
            rule.apply_health_delta(-code.penalty());
            rule.last_error_code = Some(code);
            rule.last_error_at = Some(Utc::now());
            let _ = self.rule_repo.put(rule).await;
        }
        RunOutcome::Finished
    }

    async fn reenqueue_rate_limited(&self, job: RunJob) {
        let retry_count = job.rate_limit_retry_count + 1;
        let jitter_ms = rand::thread_rng().gen_range(0..30_000);
        let delay = std::time::Duration::from_millis(60_000 + (retry_count as u64) * 60_000 + jitter_ms);
        let next = RunJob {
            trigger: RunTrigger::Retry,
            rate_limit_retry_count: retry_count,
            requested_at: Utc::now(),
            ..job
        };
        let opts = JobOptions {
            delay,
            ..JobOptions::default()
        };
        self.queues.rules_run.enqueue(next.rule_id, next, opts).await;
    }

    async fn reenqueue_timeout(&self, job: RunJob) {
        let retry_count = job.timeout_retry_count + 1;
        let next = RunJob {
            trigger: RunTrigger::Retry,
            timeout_retry_count: retry_count,
            requested_at: Utc::now(),
            ..job
        };
        let opts = JobOptions {
            delay: std::time::Duration::from_secs(30),
            ..JobOptions::default()
        };
        self.queues.rules_run.enqueue(next.rule_id, next, opts).await;
    }
}

/// `AlertConditionKind`'s serde tag is already the snake_case name the
/// spec wants for `Alert.alert_type` (e.g. `value_changed`, `price_above`);
/// reuse it instead of deriving one from `Debug`, which would yield
/// `ValueChanged` with no separators.
fn alert_type_for(kind: &sentinel_domain::model::AlertConditionKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn parse_workspace_tz(repo: &dyn WorkspaceRepo, workspace_id: Uuid) -> chrono_tz::Tz {
    repo.get(workspace_id)
        .await
        .ok()
        .flatten()
        .and_then(|w| w.timezone.parse().ok())
        .unwrap_or(chrono_tz::Tz::UTC)
}

fn classify_fetch_outcome(outcome: FetchOutcome) -> ErrorCode {
    match outcome {
        FetchOutcome::Blocked => ErrorCode::BlockCaptchaSuspected,
        FetchOutcome::CaptchaRequired => ErrorCode::BotDetection,
        FetchOutcome::Empty => ErrorCode::ParseError,
        FetchOutcome::NetworkError => ErrorCode::FetchConnection,
        FetchOutcome::ProviderError => ErrorCode::FetchHttp5xx,
        FetchOutcome::InterstitialGeo => ErrorCode::GeoBlock,
        _ => ErrorCode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_fetch_outcome_maps_block_to_captcha_suspected() {
        assert_eq!(
            classify_fetch_outcome(FetchOutcome::Blocked),
            ErrorCode::BlockCaptchaSuspected
        );
    }

    #[test]
    fn classify_fetch_outcome_maps_network_error_to_connection() {
        assert_eq!(
            classify_fetch_outcome(FetchOutcome::NetworkError),
            ErrorCode::FetchConnection
        );
    }
}

/// The six pipeline scenarios a run must get right end to end, each driven
/// through a full [`RunProcessor::run`] call against in-memory fakes of
/// every repository trait plus a scripted [`FetchProvider`].
#[cfg(test)]
mod end_to_end_tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use sentinel_domain::error::Result as DomainResult;
    use sentinel_domain::model::{
        AlertConditionKind, AlertConditionSpec, AlertPolicy, ExtractionConfig, Locale,
        NormalizationConfig, PriceNormalization, ProviderKind, Rule, RuleState, RuleType, Schedule,
        SelectorExtraction, Severity, Source, Workspace,
    };
    use sentinel_domain::repo::VersionConflict;
    use sentinel_providers::cache::InMemoryCache;
    use sentinel_providers::circuit_breaker::{CircuitBreaker, CircuitConfig};
    use sentinel_providers::rate_limit::{BucketLimits, RateLimiter};
    use sentinel_providers::traits::FetchProvider;

    fn workspace(id: Uuid) -> Workspace {
        Workspace {
            id,
            name: "acme".into(),
            timezone: "UTC".into(),
            is_canary: false,
            daily_budget_usd: None,
            created_at: Utc::now(),
        }
    }

    fn source(workspace_id: Uuid) -> Source {
        Source {
            id: Uuid::new_v4(),
            workspace_id,
            url: "https://example.com/product".into(),
            canonical_url: "https://example.com/product".into(),
            domain: "example.com".into(),
            fetch_profile_id: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// A price rule with a primary selector, one fallback selector (for the
    /// healing scenario), and a two-condition alert policy ordered so
    /// `ValueChanged` triggers before `PriceDropPercent` whenever both fire
    /// — matching the literal `alertType=value_changed` scenario text even
    /// though the drop-percent condition is what actually gates the alert.
    fn price_rule(workspace_id: Uuid, source_id: Uuid, require_consecutive: u32) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            workspace_id,
            source_id,
            name: "Widget price".into(),
            rule_type: RuleType::Price,
            extraction: ExtractionConfig::Css(SelectorExtraction {
                selector: ".price-current".into(),
                attribute: None,
                post_process: Vec::new(),
                fallback_selectors: vec![".product-price".into()],
                extract_all: false,
            }),
            normalization: NormalizationConfig::Price(PriceNormalization {
                locale: Some(Locale::SkSk),
                decimal_separator: None,
                thousand_separator: None,
                currency: None,
                scale: 2,
            }),
            alert_policy: AlertPolicy {
                conditions: vec![
                    AlertConditionSpec {
                        id: "changed".into(),
                        kind: AlertConditionKind::ValueChanged,
                        severity: Severity::High,
                    },
                    AlertConditionSpec {
                        id: "drop10".into(),
                        kind: AlertConditionKind::PriceDropPercent { pct: 10.0 },
                        severity: Severity::High,
                    },
                ],
                cooldown_seconds: 0,
                channel_ids: Vec::new(),
            },
            schedule: Schedule {
                interval_seconds: 3600,
                jitter_seconds: 0,
            },
            require_consecutive,
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
            auto_throttle_disabled: true,
            created_at: Utc::now(),
        }
    }

    fn price_html(price: &str) -> String {
        format!(r#"<html><body><span class="price-current">{price} €</span></body></html>"#)
    }

    struct FakeWorkspaceRepo(Workspace);
    #[async_trait::async_trait]
    impl WorkspaceRepo for FakeWorkspaceRepo {
        async fn get(&self, id: Uuid) -> DomainResult<Option<Workspace>> {
            Ok((id == self.0.id).then(|| self.0.clone()))
        }
        async fn list(&self) -> DomainResult<Vec<Workspace>> {
            Ok(vec![self.0.clone()])
        }
        async fn put(&self, _workspace: Workspace) -> DomainResult<()> {
            Ok(())
        }
    }

    struct FakeSourceRepo(Source);
    #[async_trait::async_trait]
    impl SourceRepo for FakeSourceRepo {
        async fn get(&self, id: Uuid) -> DomainResult<Option<Source>> {
            Ok((id == self.0.id).then(|| self.0.clone()))
        }
        async fn list_by_workspace(&self, _workspace_id: Uuid) -> DomainResult<Vec<Source>> {
            Ok(vec![self.0.clone()])
        }
        async fn put(&self, _source: Source) -> DomainResult<()> {
            Ok(())
        }
    }

    struct FakeFetchProfileRepo;
    #[async_trait::async_trait]
    impl FetchProfileRepo for FakeFetchProfileRepo {
        async fn get(&self, _id: Uuid) -> DomainResult<Option<sentinel_domain::model::FetchProfile>> {
            Ok(None)
        }
        async fn list_by_workspace(
            &self,
            _workspace_id: Uuid,
        ) -> DomainResult<Vec<sentinel_domain::model::FetchProfile>> {
            Ok(Vec::new())
        }
        async fn put(&self, _profile: sentinel_domain::model::FetchProfile) -> DomainResult<()> {
            Ok(())
        }
    }

    /// Holds one `Rule` plus its `RuleState`, with a CAS that actually
    /// enforces `expected_version`, so the retry loop in `run()` is
    /// exercised for real rather than trivially short-circuited.
    struct FakeRuleRepo {
        rule: Mutex<Rule>,
        state: Mutex<Option<RuleState>>,
    }

    impl FakeRuleRepo {
        fn new(rule: Rule) -> Self {
            Self {
                rule: Mutex::new(rule),
                state: Mutex::new(None),
            }
        }

        fn with_state(rule: Rule, state: RuleState) -> Self {
            Self {
                rule: Mutex::new(rule),
                state: Mutex::new(Some(state)),
            }
        }

        fn snapshot(&self) -> Rule {
            self.rule.lock().unwrap().clone()
        }

        fn state_snapshot(&self) -> Option<RuleState> {
            self.state.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RuleRepo for FakeRuleRepo {
        async fn get(&self, id: Uuid) -> DomainResult<Option<Rule>> {
            let rule = self.rule.lock().unwrap();
            Ok((id == rule.id).then(|| rule.clone()))
        }
        async fn list_due(&self, _now: chrono::DateTime<Utc>) -> DomainResult<Vec<Rule>> {
            Ok(Vec::new())
        }
        async fn list_by_workspace(&self, _workspace_id: Uuid) -> DomainResult<Vec<Rule>> {
            Ok(Vec::new())
        }
        async fn put(&self, rule: Rule) -> DomainResult<()> {
            *self.rule.lock().unwrap() = rule;
            Ok(())
        }
        async fn get_state(&self, _rule_id: Uuid) -> DomainResult<Option<RuleState>> {
            Ok(self.state.lock().unwrap().clone())
        }
        async fn compare_and_swap_state(
            &self,
            _rule_id: Uuid,
            expected_version: u64,
            new_state: RuleState,
        ) -> std::result::Result<(), VersionConflict> {
            let mut guard = self.state.lock().unwrap();
            let found = guard.as_ref().map(|s| s.version).unwrap_or(0);
            if found != expected_version {
                return Err(VersionConflict {
                    rule_id: new_state.rule_id,
                    expected: expected_version,
                    found,
                });
            }
            *guard = Some(new_state);
            Ok(())
        }
    }

    struct FakeRunRepo(Mutex<Vec<Run>>);
    impl FakeRunRepo {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
        fn all(&self) -> Vec<Run> {
            self.0.lock().unwrap().clone()
        }
    }
    #[async_trait::async_trait]
    impl RunRepo for FakeRunRepo {
        async fn get(&self, id: Uuid) -> DomainResult<Option<Run>> {
            Ok(self.0.lock().unwrap().iter().rev().find(|r| r.id == id).cloned())
        }
        async fn list_by_rule(&self, rule_id: Uuid, limit: usize) -> DomainResult<Vec<Run>> {
            let mut runs: Vec<Run> = self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.rule_id == rule_id)
                .cloned()
                .collect();
            runs.truncate(limit);
            Ok(runs)
        }
        async fn put(&self, run: Run) -> DomainResult<()> {
            let mut guard = self.0.lock().unwrap();
            if let Some(existing) = guard.iter_mut().find(|r| r.id == run.id) {
                *existing = run;
            } else {
                guard.push(run);
            }
            Ok(())
        }
    }

    struct FakeAlertRepo(Mutex<Vec<Alert>>);
    impl FakeAlertRepo {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
        fn all(&self) -> Vec<Alert> {
            self.0.lock().unwrap().clone()
        }
    }
    #[async_trait::async_trait]
    impl AlertRepo for FakeAlertRepo {
        async fn get(&self, id: Uuid) -> DomainResult<Option<Alert>> {
            Ok(self.0.lock().unwrap().iter().find(|a| a.id == id).cloned())
        }
        async fn list_by_workspace(&self, workspace_id: Uuid, limit: usize) -> DomainResult<Vec<Alert>> {
            let mut alerts: Vec<Alert> = self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.workspace_id == workspace_id)
                .cloned()
                .collect();
            alerts.truncate(limit);
            Ok(alerts)
        }
        async fn put(&self, alert: Alert) -> DomainResult<()> {
            let mut guard = self.0.lock().unwrap();
            if !guard.iter().any(|a| a.dedupe_key == alert.dedupe_key) {
                guard.push(alert);
            }
            Ok(())
        }
        async fn exists_with_dedupe_key(&self, dedupe_key: &str) -> DomainResult<bool> {
            Ok(self.0.lock().unwrap().iter().any(|a| a.dedupe_key == dedupe_key))
        }
        async fn upsert_by_dedupe_key(&self, alert: Alert) -> DomainResult<bool> {
            let mut guard = self.0.lock().unwrap();
            if let Some(existing) = guard.iter_mut().find(|a| a.dedupe_key == alert.dedupe_key) {
                existing.triggered_at = alert.triggered_at;
                existing.body = alert.body;
                return Ok(false);
            }
            guard.push(alert);
            Ok(true)
        }
    }

    struct NullFetchAttemptRepo;
    #[async_trait::async_trait]
    impl FetchAttemptRepo for NullFetchAttemptRepo {
        async fn put(&self, _attempt: sentinel_domain::model::FetchAttempt) -> DomainResult<()> {
            Ok(())
        }
        async fn list_by_domain_since(
            &self,
            _domain: &str,
            _since: chrono::DateTime<Utc>,
        ) -> DomainResult<Vec<sentinel_domain::model::FetchAttempt>> {
            Ok(Vec::new())
        }
        async fn list_by_workspace_since(
            &self,
            _workspace_id: Uuid,
            _since: chrono::DateTime<Utc>,
        ) -> DomainResult<Vec<sentinel_domain::model::FetchAttempt>> {
            Ok(Vec::new())
        }
    }

    struct AlwaysAcquireLock;
    #[async_trait::async_trait]
    impl CooldownLock for AlwaysAcquireLock {
        async fn try_acquire(&self, _key: &str, _ttl_seconds: u64) -> DomainResult<bool> {
            Ok(true)
        }
    }

    /// Returns each queued HTML body in sequence (repeating the last one
    /// once drained) wrapped in a successful `FetchResult`.
    struct ScriptedProvider(Mutex<VecDeque<String>>);
    impl ScriptedProvider {
        fn new(bodies: Vec<&str>) -> Self {
            Self(Mutex::new(bodies.into_iter().map(String::from).collect()))
        }
    }
    #[async_trait::async_trait]
    impl FetchProvider for ScriptedProvider {
        async fn execute(&self, _request: &FetchRequest) -> DomainResult<FetchResult> {
            let mut queue = self.0.lock().unwrap();
            let body = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap_or_default()
            };
            Ok(FetchResult {
                provider: ProviderKind::Http,
                outcome: FetchOutcome::Ok,
                http_status: Some(200),
                final_url: None,
                body_text: Some(body),
                body_bytes: 0,
                block_kind: None,
                signals: Vec::new(),
                cost_usd: 0.0,
                latency_ms: 1,
                country: None,
            })
        }
    }

    fn orchestrator_with(bodies: Vec<&str>, bucket_limits: BucketLimits) -> Orchestrator {
        let mut registry: HashMap<ProviderKind, Arc<dyn FetchProvider>> = HashMap::new();
        registry.insert(ProviderKind::Http, Arc::new(ScriptedProvider::new(bodies)));
        let cache = Arc::new(InMemoryCache::new());
        Orchestrator::new(
            registry,
            RateLimiter::new(cache.clone()),
            CircuitBreaker::new(cache, CircuitConfig::default()),
            bucket_limits,
        )
    }

    fn generous_bucket() -> BucketLimits {
        BucketLimits {
            capacity: 100.0,
            refill_per_sec: 10.0,
        }
    }

    struct Harness {
        processor: RunProcessor,
        rule_repo: Arc<FakeRuleRepo>,
        run_repo: Arc<FakeRunRepo>,
        alert_repo: Arc<FakeAlertRepo>,
    }

    fn harness(rule_repo: Arc<FakeRuleRepo>, ws: Workspace, src: Source, bodies: Vec<&str>) -> Harness {
        harness_with_bucket(rule_repo, ws, src, bodies, generous_bucket())
    }

    fn harness_with_bucket(
        rule_repo: Arc<FakeRuleRepo>,
        ws: Workspace,
        src: Source,
        bodies: Vec<&str>,
        bucket_limits: BucketLimits,
    ) -> Harness {
        let run_repo = Arc::new(FakeRunRepo::new());
        let alert_repo = Arc::new(FakeAlertRepo::new());
        let processor = RunProcessor {
            workspace_repo: Arc::new(FakeWorkspaceRepo(ws)),
            source_repo: Arc::new(FakeSourceRepo(src)),
            fetch_profile_repo: Arc::new(FakeFetchProfileRepo),
            rule_repo: rule_repo.clone(),
            run_repo: run_repo.clone(),
            alert_repo: alert_repo.clone(),
            fetch_attempt_repo: Arc::new(NullFetchAttemptRepo),
            cooldown_lock: Arc::new(AlwaysAcquireLock),
            orchestrator: Arc::new(orchestrator_with(bodies, bucket_limits)),
            budget_caps: BudgetCaps::default(),
            queues: Queues::new(),
            screenshot_sink: Arc::new(NoopScreenshotSink),
        };
        Harness {
            processor,
            rule_repo,
            run_repo,
            alert_repo,
        }
    }

    fn job(rule_id: Uuid) -> RunJob {
        RunJob {
            rule_id,
            trigger: RunTrigger::Scheduled,
            requested_at: Utc::now(),
            force_mode: None,
            debug: false,
            rate_limit_retry_count: 0,
            timeout_retry_count: 0,
        }
    }

    /// Scenario 1: a fresh rule with no prior state takes two identical
    /// observations to settle — the first sighting only seeds `lastStable`
    /// and never counts as a change, `requireConsecutive=2` by default.
    #[tokio::test]
    async fn fresh_observation_needs_two_runs_to_settle_without_alerting() {
        let ws_id = Uuid::new_v4();
        let ws = workspace(ws_id);
        let src = source(ws_id);
        let rule = price_rule(ws_id, src.id, 2);
        let rule_id = rule.id;
        let rule_repo = Arc::new(FakeRuleRepo::new(rule));
        let h = harness(rule_repo.clone(), ws, src, vec![&price_html("29,99")]);

        let first = h.processor.run(job(rule_id)).await;
        assert_eq!(first, RunOutcome::Finished);
        let state_after_first = rule_repo.state_snapshot().unwrap();
        assert_eq!(state_after_first.last_stable, None);
        assert!(h.alert_repo.all().is_empty());

        let second = h.processor.run(job(rule_id)).await;
        assert_eq!(second, RunOutcome::Finished);
        let state_after_second = rule_repo.state_snapshot().unwrap();
        match state_after_second.last_stable {
            Some(sentinel_domain::model::NormalizedValue::Price { value, .. }) => {
                assert!((value - 29.99).abs() < 1e-6)
            }
            other => panic!("expected a settled price, got {other:?}"),
        }
        assert!(
            h.alert_repo.all().is_empty(),
            "settling onto the first-ever value is not a change"
        );
    }

    /// Scenario 2: a rule that already has `lastStable=100 EUR` observes 85
    /// EUR with `requireConsecutive=1` — the drop clears `PriceDropPercent`
    /// at 10% and fires a single alert whose `alert_type` is `value_changed`
    /// (the first-ordered triggered condition), not `price_drop_percent`.
    #[tokio::test]
    async fn price_drop_confirms_in_one_run_and_alerts() {
        let ws_id = Uuid::new_v4();
        let ws = workspace(ws_id);
        let src = source(ws_id);
        let rule = price_rule(ws_id, src.id, 1);
        let rule_id = rule.id;

        let mut seed_state = RuleState::new(rule_id);
        seed_state.last_stable = Some(sentinel_domain::model::NormalizedValue::Price {
            value: 100.0,
            currency: Some("EUR".into()),
            cents_variant: None,
        });
        let rule_repo = Arc::new(FakeRuleRepo::with_state(rule, seed_state));
        let h = harness(rule_repo.clone(), ws, src, vec![&price_html("85,00")]);

        let outcome = h.processor.run(job(rule_id)).await;
        assert_eq!(outcome, RunOutcome::Finished);

        let alerts = h.alert_repo.all();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "value_changed");
        assert_eq!(alerts[0].severity, Severity::High);

        let runs = h.run_repo.all();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].observation.as_ref().unwrap().change_detected);
    }

    /// Scenario 3: the same confirmed value recurs later the same day
    /// (after a detour through a non-triggering value) — the dedupe key
    /// collides with the first alert's and the second is suppressed.
    #[tokio::test]
    async fn duplicate_confirmed_drop_same_day_is_suppressed() {
        let ws_id = Uuid::new_v4();
        let ws = workspace(ws_id);
        let src = source(ws_id);
        let rule = price_rule(ws_id, src.id, 1);
        let rule_id = rule.id;

        let mut seed_state = RuleState::new(rule_id);
        seed_state.last_stable = Some(sentinel_domain::model::NormalizedValue::Price {
            value: 100.0,
            currency: Some("EUR".into()),
            cents_variant: None,
        });
        let rule_repo = Arc::new(FakeRuleRepo::with_state(rule, seed_state));
        let h = harness(
            rule_repo.clone(),
            ws,
            src,
            vec![&price_html("85,00"), &price_html("95,00"), &price_html("85,00")],
        );

        assert_eq!(h.processor.run(job(rule_id)).await, RunOutcome::Finished);
        assert_eq!(h.alert_repo.all().len(), 1, "first drop alerts");

        assert_eq!(h.processor.run(job(rule_id)).await, RunOutcome::Finished);
        assert_eq!(h.alert_repo.all().len(), 1, "a rise past the drop threshold doesn't alert");

        assert_eq!(h.processor.run(job(rule_id)).await, RunOutcome::Finished);
        assert_eq!(
            h.alert_repo.all().len(),
            1,
            "same value, same day: the dedupe key collides and the repeat is suppressed"
        );
    }

    /// Scenario 4: an exhausted rate-limit bucket turns the very first
    /// attempt into `RateLimited` before any adapter runs; the job re-enqueues
    /// itself with a jittered 60-90s delay and the run finishes with
    /// `RATE_LIMITED_DEFERRED` rather than failing outright.
    #[tokio::test]
    async fn exhausted_bucket_defers_the_run_instead_of_failing() {
        let ws_id = Uuid::new_v4();
        let ws = workspace(ws_id);
        let src = source(ws_id);
        let rule = price_rule(ws_id, src.id, 2);
        let rule_id = rule.id;
        let rule_repo = Arc::new(FakeRuleRepo::new(rule));
        let starved = BucketLimits {
            capacity: 0.0,
            refill_per_sec: 0.0,
        };
        let h = harness_with_bucket(rule_repo, ws, src, vec![&price_html("29,99")], starved);

        let outcome = h.processor.run(job(rule_id)).await;
        assert_eq!(outcome, RunOutcome::ReEnqueuedRateLimited);

        let runs = h.run_repo.all();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].error_code, Some(ErrorCode::RateLimitedDeferred));
        assert_eq!(runs[0].status, RunStatus::Failed);

        let queued = h.processor.queues.rules_run.len().await;
        assert_eq!(queued, 1, "the job should be re-enqueued for a retry");
    }

    /// Scenario 5: the primary selector misses but a fallback clears the
    /// Jaccard similarity floor and extracts successfully — the resulting
    /// `SelectorFingerprint` records the heal, and the rule is persisted
    /// with it, without ever rewriting the immutable `ExtractionConfig`
    /// selector string itself (the fingerprint is where healed selectors
    /// live; see DESIGN.md's Open Question resolution).
    #[tokio::test]
    async fn missing_primary_selector_heals_via_fallback() {
        let ws_id = Uuid::new_v4();
        let ws = workspace(ws_id);
        let src = source(ws_id);
        let rule = price_rule(ws_id, src.id, 2);
        let rule_id = rule.id;
        let rule_repo = Arc::new(FakeRuleRepo::new(rule));
        let html = r#"<html><body><span class="product-price">19,95 €</span></body></html>"#;
        let h = harness(rule_repo.clone(), ws, src, vec![html]);

        let outcome = h.processor.run(job(rule_id)).await;
        assert_eq!(outcome, RunOutcome::Finished);

        let healed_rule = rule_repo.snapshot();
        let fp = healed_rule
            .selector_fingerprint
            .expect("a heal must persist a fingerprint");
        assert_eq!(fp.healing_history.len(), 1);
        assert_eq!(fp.healing_history[0].new_selector, ".product-price");
        match &healed_rule.extraction {
            ExtractionConfig::Css(sel) => assert_eq!(sel.selector, ".price-current"),
            _ => panic!("expected css extraction"),
        }
    }

    /// Scenario 6: a schema-drift alert fires on the first shape change,
    /// and a third run that sees the same new shape again refreshes the
    /// existing alert's `triggered_at` instead of inserting a duplicate row.
    #[tokio::test]
    async fn schema_shape_change_alerts_once_then_refreshes_on_repeat() {
        use sentinel_domain::model::{NormalizationConfig as NormCfg, SchemaExtraction};

        let ws_id = Uuid::new_v4();
        let ws = workspace(ws_id);
        let src = source(ws_id);
        let mut rule = price_rule(ws_id, src.id, 1);
        rule.extraction = ExtractionConfig::Schema(SchemaExtraction {
            query: "offers.price".into(),
            post_process: Vec::new(),
            fallback_selectors: Vec::new(),
        });
        rule.normalization = NormCfg::Price(PriceNormalization {
            locale: Some(Locale::EnUs),
            decimal_separator: None,
            thousand_separator: None,
            currency: None,
            scale: 2,
        });
        let rule_id = rule.id;

        let shape_a = r#"<html><head><script type="application/ld+json">
            {"@type":"Product","offers":{"@type":"Offer","price":"19.99","priceCurrency":"EUR"}}
            </script></head><body></body></html>"#;
        let shape_b = r#"<html><head><script type="application/ld+json">
            {"@type":"Product","name":"Widget","offers":{"@type":"Offer","price":"21.99","priceCurrency":"EUR"}}
            </script></head><body></body></html>"#;

        let rule_repo = Arc::new(FakeRuleRepo::new(rule));
        let h = harness(rule_repo.clone(), ws, src, vec![shape_a, shape_b, shape_b]);

        // First run: no stored fingerprint yet, so no drift is possible.
        assert_eq!(h.processor.run(job(rule_id)).await, RunOutcome::Finished);
        let drift_alerts = |alerts: &[Alert]| {
            alerts
                .iter()
                .filter(|a| a.alert_type == "schema_drift")
                .count()
        };
        assert_eq!(drift_alerts(&h.alert_repo.all()), 0);

        // Second run: the shape changes, so a drift alert fires.
        assert_eq!(h.processor.run(job(rule_id)).await, RunOutcome::Finished);
        let after_second = h.alert_repo.all();
        assert_eq!(drift_alerts(&after_second), 1);
        let first_triggered_at = after_second
            .iter()
            .find(|a| a.alert_type == "schema_drift")
            .unwrap()
            .triggered_at;

        // Third run: same (already-drifted) shape again — refreshes, no new row.
        assert_eq!(h.processor.run(job(rule_id)).await, RunOutcome::Finished);
        let after_third = h.alert_repo.all();
        assert_eq!(drift_alerts(&after_third), 1, "a repeat of the same shape must not insert a second row");
        let refreshed = after_third.iter().find(|a| a.alert_type == "schema_drift").unwrap();
        assert!(refreshed.triggered_at >= first_triggered_at);
    }
}
