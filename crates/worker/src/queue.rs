//! Internal work queue (spec §6): three named queues carrying JSON
//! payloads over a shared `Queue<T>` abstraction. The in-memory default
//! implementation is built on `tokio_util::time::DelayQueue` so delayed
//! re-enqueue (rate-limit backoff, retry jitter) needs no extra crate —
//! the teacher already depends on `tokio-util` for its SSE/stream plumbing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::time::DelayQueue;
use uuid::Uuid;

/// `rules-run` payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub rule_id: Uuid,
    pub trigger: RunTrigger,
    pub requested_at: DateTime<Utc>,
    pub force_mode: Option<String>,
    pub debug: bool,
    pub rate_limit_retry_count: u32,
    pub timeout_retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    Webhook,
    Retry,
}

/// `alerts-dispatch` payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchJob {
    pub alert_id: Uuid,
    pub workspace_id: Uuid,
    pub rule_id: Uuid,
    pub channels: Vec<Uuid>,
    pub dedupe_key: String,
}

/// `maintenance` payload (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceJob {
    pub task: MaintenanceTask,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceTask {
    RawsampleCleanup,
    FetchAttemptsCleanup,
}

/// Job options (spec §6): `removeOnComplete`/`removeOnFail` ages, bounded
/// attempts, exponential backoff starting at 2000ms.
#[derive(Debug, Clone, Copy)]
pub struct JobOptions {
    pub remove_on_complete_secs: u64,
    pub remove_on_fail_secs: u64,
    pub attempts: u32,
    pub backoff_start_ms: u64,
    pub delay: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            remove_on_complete_secs: 86_400,
            remove_on_fail_secs: 604_800,
            attempts: 3,
            backoff_start_ms: 2_000,
            delay: Duration::ZERO,
        }
    }
}

impl JobOptions {
    /// Exponential backoff for the `n`th retry attempt (0-indexed), per
    /// the `backoff_start_ms` base.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.backoff_start_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(ms)
    }
}

/// A job id carries the rule id and a monotonic suffix so retries never
/// clash (spec §6: "Job IDs carry the rule id and a monotonic suffix").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub key: Uuid,
    pub seq: u64,
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.key, self.seq)
    }
}

struct Entry<T> {
    id: JobId,
    payload: T,
    attempt: u32,
}

/// A single named in-memory queue. `enqueue` schedules the job to become
/// ready after `opts.delay` elapses; `dequeue` yields the next ready job.
pub struct DelayedQueue<T> {
    name: &'static str,
    inner: Mutex<(DelayQueue<Entry<T>>, HashMap<JobId, u32>)>,
    seq: AtomicU64,
}

impl<T: Clone + Send + 'static> DelayedQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new((DelayQueue::new(), HashMap::new())),
            seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue `payload` keyed by `key` (the rule id, alert id, etc.),
    /// becoming ready after `opts.delay`.
    pub async fn enqueue(&self, key: Uuid, payload: T, opts: JobOptions) -> JobId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = JobId { key, seq };
        let entry = Entry {
            id,
            payload,
            attempt: 0,
        };
        let mut guard = self.inner.lock().await;
        guard.0.insert(entry, opts.delay);
        guard.1.insert(id, opts.attempts);
        tracing::debug!(queue = self.name, job_id = %id, delay_ms = opts.delay.as_millis() as u64, "enqueued job");
        id
    }

    /// Re-enqueue a failed job for retry, bumping its attempt counter.
    /// Returns `None` once `opts.attempts` has been exhausted.
    pub async fn retry(&self, id: JobId, payload: T, prior_attempt: u32, opts: JobOptions) -> Option<JobId> {
        let next_attempt = prior_attempt + 1;
        if next_attempt >= opts.attempts {
            tracing::warn!(queue = self.name, job_id = %id, attempts = opts.attempts, "job exhausted retry attempts");
            return None;
        }
        let delay = opts.backoff_for_attempt(next_attempt);
        let entry = Entry {
            id,
            payload,
            attempt: next_attempt,
        };
        let mut guard = self.inner.lock().await;
        guard.0.insert(entry, delay);
        Some(id)
    }

    /// Pop the next ready job, if any (non-blocking).
    pub async fn try_dequeue(&self) -> Option<(JobId, T, u32)> {
        let mut guard = self.inner.lock().await;
        let expired = futures_util::future::poll_fn(|cx| {
            use std::task::Poll;
            match guard.0.poll_expired(cx) {
                Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
                Poll::Ready(None) | Poll::Pending => Poll::Ready(None),
            }
        })
        .await?;
        let entry = expired.ok()?.into_inner();
        guard.1.remove(&entry.id);
        Some((entry.id, entry.payload, entry.attempt))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.0.len()
    }
}

/// The three queues (spec §6), wired together behind one handle the
/// scheduler / run processor / maintenance loop can clone cheaply.
#[derive(Clone)]
pub struct Queues {
    pub rules_run: Arc<DelayedQueue<RunJob>>,
    pub alerts_dispatch: Arc<DelayedQueue<DispatchJob>>,
    pub maintenance: Arc<DelayedQueue<MaintenanceJob>>,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            rules_run: Arc::new(DelayedQueue::new("rules-run")),
            alerts_dispatch: Arc::new(DelayedQueue::new("alerts-dispatch")),
            maintenance: Arc::new(DelayedQueue::new("maintenance")),
        }
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_with_zero_delay_is_immediately_ready() {
        let q: DelayedQueue<u32> = DelayedQueue::new("test");
        let key = Uuid::new_v4();
        q.enqueue(key, 7, JobOptions::default()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (_, payload, attempt) = q.try_dequeue().await.unwrap();
        assert_eq!(payload, 7);
        assert_eq!(attempt, 0);
    }

    #[tokio::test]
    async fn delayed_job_is_not_ready_before_its_delay() {
        let q: DelayedQueue<u32> = DelayedQueue::new("test");
        let key = Uuid::new_v4();
        let opts = JobOptions {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        q.enqueue(key, 1, opts).await;
        assert!(q.try_dequeue().await.is_none());
    }

    #[tokio::test]
    async fn retry_exhausts_after_configured_attempts() {
        let q: DelayedQueue<u32> = DelayedQueue::new("test");
        let opts = JobOptions {
            attempts: 3,
            backoff_start_ms: 1,
            ..Default::default()
        };
        let id = JobId {
            key: Uuid::new_v4(),
            seq: 0,
        };
        let second = q.retry(id, 1, 0, opts).await;
        assert!(second.is_some());
        let third = q.retry(id, 1, 1, opts).await;
        assert!(third.is_some());
        let fourth = q.retry(id, 1, 2, opts).await;
        assert!(fourth.is_none(), "attempt 2 is the 3rd attempt and must be the last");
    }

    #[tokio::test]
    async fn backoff_grows_exponentially_from_base() {
        let opts = JobOptions {
            backoff_start_ms: 2000,
            ..Default::default()
        };
        assert_eq!(opts.backoff_for_attempt(0), Duration::from_millis(2000));
        assert_eq!(opts.backoff_for_attempt(1), Duration::from_millis(4000));
        assert_eq!(opts.backoff_for_attempt(2), Duration::from_millis(8000));
    }
}
