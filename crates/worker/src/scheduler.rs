//! The scheduler tick loop (spec §4.10). Built on the teacher's
//! `ScheduleRunner` tick shape: a single-threaded loop with a try-lock
//! re-entrance guard, generalized here from "fire an agent prompt" to
//! "claim due rules and enqueue fetch-and-run jobs."

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sentinel_domain::model::Rule;
use sentinel_domain::repo::SourceRepo;
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::{JobOptions, Queues, RunJob, RunTrigger};
use crate::store::JsonRuleRepo;

/// Pacing delay applied between jobs within the same domain group (spec
/// §4.10 step 3).
const DOMAIN_PACING_DELAY: Duration = Duration::from_millis(100);
/// How long the scheduler waits for an in-flight tick to finish on
/// shutdown (spec §4.10 "Shutdown").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
/// Parked `nextRunAt` when an enqueue fails mid-tick, so the rule gets
/// retried soon rather than waiting out its full claim-parked window.
const ENQUEUE_FAILURE_RETRY_DELAY_SECS: i64 = 60;

pub struct Scheduler {
    rule_repo: Arc<JsonRuleRepo>,
    source_repo: Arc<dyn SourceRepo>,
    queues: Queues,
    batch_size: usize,
    tick_interval: Duration,
    processing: AtomicBool,
}

impl Scheduler {
    pub fn new(
        rule_repo: Arc<JsonRuleRepo>,
        source_repo: Arc<dyn SourceRepo>,
        queues: Queues,
        batch_size: usize,
        tick_interval: Duration,
    ) -> Self {
        Self {
            rule_repo,
            source_repo,
            queues,
            batch_size,
            tick_interval,
            processing: AtomicBool::new(false),
        }
    }

    /// Run the tick loop until `shutdown` resolves. Re-entrant ticks are
    /// skipped via `processing` rather than queued (spec §4.10 "One tick
    /// in flight at a time").
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = &mut shutdown => {
                    info!("scheduler shutting down; waiting up to 30s for in-flight tick");
                    let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
                    tokio::pin!(deadline);
                    while self.processing.load(Ordering::SeqCst) {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                            _ = &mut deadline => break,
                        }
                    }
                    return;
                }
            }
        }
    }

    /// One tick (spec §4.10 steps 1-4). Returns the number of rules
    /// claimed, for tests.
    pub async fn tick(&self) -> usize {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return 0;
        }
        let _guard = scopeguard(&self.processing);

        let now = Utc::now();
        let claimed = self.rule_repo.claim_due(now, self.batch_size).await;
        if claimed.is_empty() {
            return 0;
        }
        let count = claimed.len();

        let mut by_domain: BTreeMap<String, Vec<Rule>> = BTreeMap::new();
        for rule in claimed {
            let domain = self
                .source_repo
                .get(rule.source_id)
                .await
                .ok()
                .flatten()
                .map(|s| s.domain)
                .unwrap_or_else(|| rule.source_id.to_string());
            by_domain.entry(domain).or_default().push(rule);
        }

        for (_domain, rules) in by_domain {
            for (idx, rule) in rules.into_iter().enumerate() {
                if idx > 0 {
                    tokio::time::sleep(DOMAIN_PACING_DELAY).await;
                }
                self.enqueue_and_reschedule(rule, now).await;
            }
        }

        count
    }

    async fn enqueue_and_reschedule(&self, rule: Rule, now: chrono::DateTime<Utc>) {
        let job = RunJob {
            rule_id: rule.id,
            trigger: RunTrigger::Scheduled,
            requested_at: now,
            force_mode: None,
            debug: false,
            rate_limit_retry_count: 0,
            timeout_retry_count: 0,
        };

        self.queues
            .rules_run
            .enqueue(rule.id, job, JobOptions::default())
            .await;

        let interval_secs = rule.effective_interval_seconds();
        let jitter = if rule.schedule.jitter_seconds > 0 {
            rand::thread_rng().gen_range(0..=rule.schedule.jitter_seconds)
        } else {
            0
        };
        let next_run_at = now + chrono::Duration::seconds(interval_secs as i64 + jitter as i64);

        let mut rescheduled = rule;
        rescheduled.next_run_at = next_run_at;
        if let Err(e) = self.rule_repo.put(rescheduled.clone()).await {
            warn!(error = %e, rule_id = %rescheduled.id, "failed to persist next_run_at; parking for short retry");
            rescheduled.next_run_at = now + chrono::Duration::seconds(ENQUEUE_FAILURE_RETRY_DELAY_SECS);
            let _ = self.rule_repo.put(rescheduled).await;
        }
    }
}

/// Clears the `processing` guard when the tick (or an early return within
/// it) drops, so a panic mid-tick can't wedge the scheduler forever.
fn scopeguard(flag: &AtomicBool) -> impl Drop + '_ {
    struct Guard<'a>(&'a AtomicBool);
    impl Drop for Guard<'_> {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }
    Guard(flag)
}
