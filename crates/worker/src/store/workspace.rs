use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::Workspace;
use sentinel_domain::repo::WorkspaceRepo;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{file_path, load_vec, persist_vec};

pub struct JsonWorkspaceRepo {
    inner: RwLock<HashMap<Uuid, Workspace>>,
    path: std::path::PathBuf,
}

impl JsonWorkspaceRepo {
    pub fn new(state_dir: &Path) -> Self {
        let path = file_path(state_dir, "workspaces");
        let items: Vec<Workspace> = load_vec(&path);
        let inner = items.into_iter().map(|w| (w.id, w)).collect();
        Self {
            inner: RwLock::new(inner),
            path,
        }
    }

    async fn persist(&self) {
        let items: Vec<Workspace> = self.inner.read().await.values().cloned().collect();
        persist_vec(self.path.clone(), items).await;
    }
}

#[async_trait]
impl WorkspaceRepo for JsonWorkspaceRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Workspace>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn put(&self, workspace: Workspace) -> Result<()> {
        self.inner.write().await.insert(workspace.id, workspace);
        self.persist().await;
        Ok(())
    }
}
