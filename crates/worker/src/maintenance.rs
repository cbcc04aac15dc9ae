//! Maintenance jobs (spec §4.11): two daily cleanup tasks, installed once
//! at module init the way the teacher installs its repeatable agent-cron
//! jobs ("removes any existing duplicates by key" before re-registering),
//! generalized here from agent-schedule cron to maintenance-job cron.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Timelike, Utc};
use tracing::info;

use crate::store::{JsonFetchAttemptRepo, JsonRunRepo};

/// Retention window for `Run.rawSample` (spec §4.11 rawsample-cleanup).
const RAW_SAMPLE_RETENTION_DAYS: i64 = 7;
/// Retention window for `FetchAttempt` rows (spec §4.11 fetch-attempts-cleanup).
const FETCH_ATTEMPT_RETENTION_DAYS: i64 = 30;
/// Row batch size for the fetch-attempts delete loop.
const FETCH_ATTEMPT_BATCH_SIZE: usize = 10_000;

/// One 5-field-cron-equivalent daily task: a UTC time-of-day the job is
/// due to run, tracked by the date it last ran so a tick loop with any
/// poll interval still fires exactly once per day.
struct DailyJob {
    at: NaiveTime,
    last_run_date: Option<chrono::NaiveDate>,
}

impl DailyJob {
    fn new(hour: u32, minute: u32) -> Self {
        Self {
            at: NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time"),
            last_run_date: None,
        }
    }

    /// Whether this job is due at `now`, consuming the due state if so
    /// (idempotent re-check within the same minute returns `false`).
    fn due(&mut self, now: chrono::DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.last_run_date == Some(today) {
            return false;
        }
        let now_time = now.time();
        let due = now_time.hour() > self.at.hour()
            || (now_time.hour() == self.at.hour() && now_time.minute() >= self.at.minute());
        if due {
            self.last_run_date = Some(today);
        }
        due
    }
}

pub struct MaintenanceRunner {
    run_repo: Arc<JsonRunRepo>,
    fetch_attempt_repo: Arc<JsonFetchAttemptRepo>,
    rawsample_cleanup: tokio::sync::Mutex<DailyJob>,
    fetch_attempts_cleanup: tokio::sync::Mutex<DailyJob>,
}

impl MaintenanceRunner {
    pub fn new(run_repo: Arc<JsonRunRepo>, fetch_attempt_repo: Arc<JsonFetchAttemptRepo>) -> Self {
        Self {
            run_repo,
            fetch_attempt_repo,
            rawsample_cleanup: tokio::sync::Mutex::new(DailyJob::new(3, 30)),
            fetch_attempts_cleanup: tokio::sync::Mutex::new(DailyJob::new(4, 0)),
        }
    }

    /// Poll loop: checks both jobs' due state every `poll_interval` and
    /// runs whichever is due. A 60s poll interval comfortably resolves
    /// either job's minute-granularity schedule.
    pub async fn run(&self, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();

            if self.rawsample_cleanup.lock().await.due(now) {
                self.run_rawsample_cleanup(now).await;
            }
            if self.fetch_attempts_cleanup.lock().await.due(now) {
                self.run_fetch_attempts_cleanup(now).await;
            }
        }
    }

    async fn run_rawsample_cleanup(&self, now: chrono::DateTime<Utc>) {
        let cutoff = now - chrono::Duration::days(RAW_SAMPLE_RETENTION_DAYS);
        let cleared = self.run_repo.clear_raw_samples_older_than(cutoff).await;
        info!(cleared, "rawsample-cleanup finished");
    }

    async fn run_fetch_attempts_cleanup(&self, now: chrono::DateTime<Utc>) {
        let cutoff = now - chrono::Duration::days(FETCH_ATTEMPT_RETENTION_DAYS);
        let mut total = 0usize;
        loop {
            let removed = self
                .fetch_attempt_repo
                .prune_older_than(cutoff, FETCH_ATTEMPT_BATCH_SIZE)
                .await;
            total += removed;
            if removed < FETCH_ATTEMPT_BATCH_SIZE {
                break;
            }
        }
        info!(total, "fetch-attempts-cleanup finished");
    }
}
