//! JSON file backed deployment store

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DeploymentStore, RecordPatch, StoreData};
use crate::errors::ClawError;
use crate::filesys::file::File;
use crate::models::{DeploymentRecord, PluginConfig, SecretReference, SkillConfig};

/// Keeps the whole data set in memory and rewrites the file atomically
/// after every change. A write that fails to persist leaves memory untouched.
pub struct JsonFileStore {
    file: File,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    /// Load the store from `file`, starting empty when it does not exist
    pub async fn open(file: File) -> Result<Self, ClawError> {
        let data = if file.exists().await {
            file.read_json::<StoreData>().await.map_err(|e| {
                ClawError::StorageError(format!("{}: {}", file.path().display(), e))
            })?
        } else {
            StoreData::default()
        };
        info!(
            "deployment store at {} ({} records)",
            file.path().display(),
            data.records.len()
        );
        Ok(Self {
            file,
            data: Mutex::new(data),
        })
    }

    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut StoreData) -> Result<T, ClawError> + Send,
    ) -> Result<T, ClawError> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let out = change(&mut next)?;
        self.file
            .write_json(&next)
            .await
            .map_err(|e| ClawError::StorageError(format!("{}: {}", self.file.path().display(), e)))?;
        debug!("deployment store saved");
        *data = next;
        Ok(out)
    }
}

#[async_trait]
impl DeploymentStore for JsonFileStore {
    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>, ClawError> {
        Ok(self.data.lock().await.get(id))
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>, ClawError> {
        Ok(self.data.lock().await.list())
    }

    async fn insert(&self, record: &DeploymentRecord) -> Result<(), ClawError> {
        self.mutate(|data| data.insert(record)).await
    }

    async fn patch(&self, id: &str, patch: &RecordPatch) -> Result<DeploymentRecord, ClawError> {
        self.mutate(|data| data.patch(id, patch)).await
    }

    async fn remove(&self, id: &str) -> Result<(), ClawError> {
        self.mutate(|data| data.remove(id)).await
    }

    async fn plugin_configs(&self, id: &str) -> Result<Vec<PluginConfig>, ClawError> {
        Ok(self.data.lock().await.plugin_configs(id))
    }

    async fn set_plugin_config(&self, config: &PluginConfig) -> Result<(), ClawError> {
        self.mutate(|data| data.set_plugin_config(config)).await
    }

    async fn skill_configs(&self, id: &str) -> Result<Vec<SkillConfig>, ClawError> {
        Ok(self.data.lock().await.skill_configs(id))
    }

    async fn set_skill_config(&self, config: &SkillConfig) -> Result<(), ClawError> {
        self.mutate(|data| data.set_skill_config(config)).await
    }

    async fn secret_refs(&self, id: &str) -> Result<Vec<SecretReference>, ClawError> {
        Ok(self.data.lock().await.secret_refs(id))
    }

    async fn put_secret_ref(&self, reference: &SecretReference) -> Result<(), ClawError> {
        self.mutate(|data| data.put_secret_ref(reference)).await
    }
}
