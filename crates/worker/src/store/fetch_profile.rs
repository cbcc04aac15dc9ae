use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::FetchProfile;
use sentinel_domain::repo::FetchProfileRepo;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{file_path, load_vec, persist_vec};

pub struct JsonFetchProfileRepo {
    inner: RwLock<HashMap<Uuid, FetchProfile>>,
    path: std::path::PathBuf,
}

impl JsonFetchProfileRepo {
    pub fn new(state_dir: &Path) -> Self {
        let path = file_path(state_dir, "fetch_profiles");
        let items: Vec<FetchProfile> = load_vec(&path);
        let inner = items.into_iter().map(|p| (p.id, p)).collect();
        Self {
            inner: RwLock::new(inner),
            path,
        }
    }

    async fn persist(&self) {
        let items: Vec<FetchProfile> = self.inner.read().await.values().cloned().collect();
        persist_vec(self.path.clone(), items).await;
    }
}

#[async_trait]
impl FetchProfileRepo for JsonFetchProfileRepo {
    async fn get(&self, id: Uuid) -> Result<Option<FetchProfile>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<FetchProfile>> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn put(&self, profile: FetchProfile) -> Result<()> {
        self.inner.write().await.insert(profile.id, profile);
        self.persist().await;
        Ok(())
    }
}
