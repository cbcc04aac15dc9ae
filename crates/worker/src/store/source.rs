use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::{Channel, Source};
use sentinel_domain::repo::{ChannelRepo, SourceRepo};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{file_path, load_vec, persist_vec};

pub struct JsonSourceRepo {
    inner: RwLock<HashMap<Uuid, Source>>,
    path: std::path::PathBuf,
}

impl JsonSourceRepo {
    pub fn new(state_dir: &Path) -> Self {
        let path = file_path(state_dir, "sources");
        let items: Vec<Source> = load_vec(&path);
        let inner = items.into_iter().map(|s| (s.id, s)).collect();
        Self {
            inner: RwLock::new(inner),
            path,
        }
    }

    async fn persist(&self) {
        let items: Vec<Source> = self.inner.read().await.values().cloned().collect();
        persist_vec(self.path.clone(), items).await;
    }
}

#[async_trait]
impl SourceRepo for JsonSourceRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<Source>> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn put(&self, source: Source) -> Result<()> {
        self.inner.write().await.insert(source.id, source);
        self.persist().await;
        Ok(())
    }
}

pub struct JsonChannelRepo {
    inner: RwLock<HashMap<Uuid, Channel>>,
    path: std::path::PathBuf,
}

impl JsonChannelRepo {
    pub fn new(state_dir: &Path) -> Self {
        let path = file_path(state_dir, "channels");
        let items: Vec<Channel> = load_vec(&path);
        let inner = items.into_iter().map(|c| (c.id, c)).collect();
        Self {
            inner: RwLock::new(inner),
            path,
        }
    }

    async fn persist(&self) {
        let items: Vec<Channel> = self.inner.read().await.values().cloned().collect();
        persist_vec(self.path.clone(), items).await;
    }
}

#[async_trait]
impl ChannelRepo for JsonChannelRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Channel>> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<Channel>> {
        Ok(self
            .inner
            .read()
            .await
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn put(&self, channel: Channel) -> Result<()> {
        self.inner.write().await.insert(channel.id, channel);
        self.persist().await;
        Ok(())
    }
}
