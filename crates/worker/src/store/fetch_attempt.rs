//! Append-only fetch-attempt ledger (spec §3: "FetchAttempt — append-only").
//!
//! Grounded on the teacher's `DeliveryStore` (`runtime/deliveries.rs`):
//! persisted as JSONL via an append-only `OpenOptions::append`, loaded by
//! reading one record per line. Unlike `Run`/`Rule`/`Alert`, nothing here
//! is ever rewritten in place — the budget guard and cost reporting only
//! ever read a time-bounded window, and the maintenance job only ever
//! deletes the oldest rows wholesale, so there is no in-place-update case
//! that would force a full-file rewrite on every write.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_domain::error::Result;
use sentinel_domain::model::FetchAttempt;
use sentinel_domain::repo::FetchAttemptRepo;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct JsonFetchAttemptRepo {
    inner: RwLock<Vec<FetchAttempt>>,
    path: PathBuf,
}

impl JsonFetchAttemptRepo {
    pub fn new(state_dir: &std::path::Path) -> Self {
        let _ = std::fs::create_dir_all(state_dir);
        let path = state_dir.join("fetch_attempts.jsonl");
        let items = Self::load(&path);
        Self {
            inner: RwLock::new(items),
            path,
        }
    }

    fn load(path: &std::path::Path) -> Vec<FetchAttempt> {
        let Ok(data) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        data.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    fn append_one(path: &std::path::Path, attempt: &FetchAttempt) {
        use std::io::Write;
        let Ok(json) = serde_json::to_string(attempt) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{json}") {
                    tracing::warn!(error = %e, "failed to append fetch attempt ledger line");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to open fetch attempt ledger"),
        }
    }

    async fn rewrite(&self, items: &[FetchAttempt]) {
        let path = self.path.clone();
        let lines: Vec<String> = items
            .iter()
            .filter_map(|a| serde_json::to_string(a).ok())
            .collect();
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(&path, lines.join("\n") + "\n") {
                tracing::warn!(error = %e, "failed to rewrite fetch attempt ledger");
            }
        })
        .await;
    }

    /// `fetch-attempts-cleanup` maintenance job (spec §4.11): deletes rows
    /// older than `cutoff` in batches of `batch_size`. Returns the number of
    /// rows deleted this call; the caller loops until a call returns less
    /// than `batch_size`.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>, batch_size: usize) -> usize {
        let mut guard = self.inner.write().await;
        let total_stale = guard.iter().filter(|a| a.created_at < cutoff).count();
        if total_stale == 0 {
            return 0;
        }
        let to_remove = total_stale.min(batch_size);

        let mut removed = 0usize;
        let mut kept = Vec::with_capacity(guard.len());
        for attempt in guard.drain(..) {
            if removed < to_remove && attempt.created_at < cutoff {
                removed += 1;
            } else {
                kept.push(attempt);
            }
        }
        *guard = kept;
        let snapshot = guard.clone();
        drop(guard);
        self.rewrite(&snapshot).await;
        removed
    }
}

#[async_trait]
impl FetchAttemptRepo for JsonFetchAttemptRepo {
    async fn put(&self, attempt: FetchAttempt) -> Result<()> {
        Self::append_one(&self.path, &attempt);
        self.inner.write().await.push(attempt);
        Ok(())
    }

    async fn list_by_domain_since(
        &self,
        domain: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchAttempt>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|a| a.hostname == domain && a.created_at >= since)
            .cloned()
            .collect())
    }

    async fn list_by_workspace_since(
        &self,
        workspace_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<FetchAttempt>> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|a| a.workspace_id == workspace_id && a.created_at >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_domain::model::{FetchOutcome, ProviderKind};

    fn sample(hostname: &str, workspace_id: Uuid, created_at: DateTime<Utc>) -> FetchAttempt {
        FetchAttempt {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            workspace_id,
            rule_id: None,
            hostname: hostname.into(),
            provider: ProviderKind::Http,
            outcome: FetchOutcome::Ok,
            block_kind: None,
            http_status: Some(200),
            body_bytes: 128,
            cost_usd: 0.0,
            latency_ms: 50,
            created_at,
        }
    }

    #[tokio::test]
    async fn put_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let workspace_id = Uuid::new_v4();
        {
            let repo = JsonFetchAttemptRepo::new(dir.path());
            repo.put(sample("example.com", workspace_id, Utc::now()))
                .await
                .unwrap();
        }
        let repo = JsonFetchAttemptRepo::new(dir.path());
        let since = Utc::now() - chrono::Duration::hours(1);
        let found = repo.list_by_domain_since("example.com", since).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_rows_up_to_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonFetchAttemptRepo::new(dir.path());
        let workspace_id = Uuid::new_v4();
        let old = Utc::now() - chrono::Duration::days(30);
        let recent = Utc::now();
        for _ in 0..3 {
            repo.put(sample("a.test", workspace_id, old)).await.unwrap();
        }
        repo.put(sample("a.test", workspace_id, recent)).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let removed = repo.prune_older_than(cutoff, 2).await;
        assert_eq!(removed, 2);

        let remaining = repo.inner.read().await.len();
        assert_eq!(remaining, 2);
    }
}
