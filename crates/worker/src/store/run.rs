use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::Run;
use sentinel_domain::repo::RunRepo;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{file_path, load_vec, persist_vec};

pub struct JsonRunRepo {
    inner: RwLock<HashMap<Uuid, Run>>,
    path: std::path::PathBuf,
}

impl JsonRunRepo {
    pub fn new(state_dir: &Path) -> Self {
        let path = file_path(state_dir, "runs");
        let items: Vec<Run> = load_vec(&path);
        let inner = items.into_iter().map(|r| (r.id, r)).collect();
        Self {
            inner: RwLock::new(inner),
            path,
        }
    }

    async fn persist(&self) {
        let items: Vec<Run> = self.inner.read().await.values().cloned().collect();
        persist_vec(self.path.clone(), items).await;
    }

    /// Used by the `rawsample-cleanup` maintenance job (spec §4.11).
    pub async fn clear_raw_samples_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let mut cleared = 0usize;
        {
            let mut guard = self.inner.write().await;
            for run in guard.values_mut() {
                if run.started_at < cutoff && run.raw_sample.is_some() {
                    run.raw_sample = None;
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            self.persist().await;
        }
        cleared
    }
}

#[async_trait]
impl RunRepo for JsonRunRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list_by_rule(&self, rule_id: Uuid, limit: usize) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .inner
            .read()
            .await
            .values()
            .filter(|r| r.rule_id == rule_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn put(&self, run: Run) -> Result<()> {
        self.inner.write().await.insert(run.id, run);
        self.persist().await;
        Ok(())
    }
}
