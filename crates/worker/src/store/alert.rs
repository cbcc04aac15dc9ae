use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::Alert;
use sentinel_domain::repo::AlertRepo;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{file_path, load_vec, persist_vec};

pub struct JsonAlertRepo {
    inner: RwLock<HashMap<Uuid, Alert>>,
    path: std::path::PathBuf,
}

impl JsonAlertRepo {
    pub fn new(state_dir: &Path) -> Self {
        let path = file_path(state_dir, "alerts");
        let items: Vec<Alert> = load_vec(&path);
        let inner = items.into_iter().map(|a| (a.id, a)).collect();
        Self {
            inner: RwLock::new(inner),
            path,
        }
    }

    async fn persist(&self) {
        let items: Vec<Alert> = self.inner.read().await.values().cloned().collect();
        persist_vec(self.path.clone(), items).await;
    }

    /// Schema-drift alerts (spec §4.5) refresh `triggered_at`/`body` on a
    /// repeat of the same `dedupe_key` rather than being silently dropped
    /// like a generic duplicate insert — "a unique-constraint collision on
    /// insert triggers a `triggeredAt` refresh and body-update to track
    /// recurrence". Returns `true` if this inserted a new row, `false` if
    /// it refreshed an existing one.
    pub async fn upsert_by_dedupe_key(&self, alert: Alert) -> bool {
        let mut guard = self.inner.write().await;
        let existing_id = guard
            .values()
            .find(|a| a.dedupe_key == alert.dedupe_key)
            .map(|a| a.id);
        let inserted = match existing_id {
            Some(id) => {
                if let Some(existing) = guard.get_mut(&id) {
                    existing.triggered_at = alert.triggered_at;
                    existing.body = alert.body;
                }
                false
            }
            None => {
                guard.insert(alert.id, alert);
                true
            }
        };
        drop(guard);
        self.persist().await;
        inserted
    }
}

#[async_trait]
impl AlertRepo for JsonAlertRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: Uuid, limit: usize) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .inner
            .read()
            .await
            .values()
            .filter(|a| a.workspace_id == workspace_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.triggered_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    /// Duplicate `dedupe_key` inserts collapse silently (spec §3): if an
    /// alert with this key already exists, the put is a no-op.
    async fn put(&self, alert: Alert) -> Result<()> {
        let mut guard = self.inner.write().await;
        let exists = guard.values().any(|a| a.dedupe_key == alert.dedupe_key);
        if !exists {
            guard.insert(alert.id, alert);
        }
        drop(guard);
        self.persist().await;
        Ok(())
    }

    async fn exists_with_dedupe_key(&self, dedupe_key: &str) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .any(|a| a.dedupe_key == dedupe_key))
    }

    async fn upsert_by_dedupe_key(&self, alert: Alert) -> Result<bool> {
        // Resolves to the inherent method above (inherent methods take
        // priority over trait methods of the same name), which already
        // implements the insert-or-refresh semantics.
        Ok(self.upsert_by_dedupe_key(alert).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_alert(dedupe_key: &str) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            triggered_at: Utc::now(),
            severity: sentinel_domain::model::Severity::Medium,
            alert_type: "value_changed".into(),
            title: "t".into(),
            body: "b".into(),
            metadata: Default::default(),
            dedupe_key: dedupe_key.into(),
            channels_sent: Vec::new(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_dedupe_key_put_collapses_silently() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonAlertRepo::new(dir.path());
        repo.put(sample_alert("k1")).await.unwrap();
        repo.put(sample_alert("k1")).await.unwrap();
        assert!(repo.exists_with_dedupe_key("k1").await.unwrap());
        // Only one alert should actually be stored.
        let count = repo.inner.read().await.len();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_refreshes_existing_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonAlertRepo::new(dir.path());
        let first = sample_alert("schema_drift:rule:H1");
        let first_id = first.id;
        assert!(repo.upsert_by_dedupe_key(first).await);

        let mut second = sample_alert("schema_drift:rule:H1");
        second.body = "refreshed".into();
        assert!(!repo.upsert_by_dedupe_key(second).await);

        let stored = repo.get(first_id).await.unwrap().unwrap();
        assert_eq!(stored.body, "refreshed");
    }
}
