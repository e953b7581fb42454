//! In-memory deployment store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{DeploymentStore, RecordPatch, StoreData};
use crate::errors::ClawError;
use crate::models::{DeploymentRecord, PluginConfig, SecretReference, SkillConfig};

/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreData>, ClawError> {
        self.data
            .read()
            .map_err(|_| ClawError::StorageError("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreData>, ClawError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ClawError::StorageError("store unavailable".into()));
        }
        self.data
            .write()
            .map_err(|_| ClawError::StorageError("lock poisoned".into()))
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>, ClawError> {
        Ok(self.read()?.get(id))
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>, ClawError> {
        Ok(self.read()?.list())
    }

    async fn insert(&self, record: &DeploymentRecord) -> Result<(), ClawError> {
        self.write()?.insert(record)
    }

    async fn patch(&self, id: &str, patch: &RecordPatch) -> Result<DeploymentRecord, ClawError> {
        self.write()?.patch(id, patch)
    }

    async fn remove(&self, id: &str) -> Result<(), ClawError> {
        self.write()?.remove(id)
    }

    async fn plugin_configs(&self, id: &str) -> Result<Vec<PluginConfig>, ClawError> {
        Ok(self.read()?.plugin_configs(id))
    }

    async fn set_plugin_config(&self, config: &PluginConfig) -> Result<(), ClawError> {
        self.write()?.set_plugin_config(config)
    }

    async fn skill_configs(&self, id: &str) -> Result<Vec<SkillConfig>, ClawError> {
        Ok(self.read()?.skill_configs(id))
    }

    async fn set_skill_config(&self, config: &SkillConfig) -> Result<(), ClawError> {
        self.write()?.set_skill_config(config)
    }

    async fn secret_refs(&self, id: &str) -> Result<Vec<SecretReference>, ClawError> {
        Ok(self.read()?.secret_refs(id))
    }

    async fn put_secret_ref(&self, reference: &SecretReference) -> Result<(), ClawError> {
        self.write()?.put_secret_ref(reference)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::Utc;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::{Branding, DeploymentRequest, DeploymentStatus, Models};

    fn record() -> DeploymentRecord {
        DeploymentRecord::new(&DeploymentRequest {
            project_id: "acme-agents".into(),
            zone: "us-central1-a".into(),
            vm_name: "claw".into(),
            machine_type: "e2-small".into(),
            branding: Branding {
                bot_name: "Dyno".into(),
                personality: String::new(),
                system_prompt: None,
            },
            models: Models {
                primary: "m".into(),
                fallbacks: vec![],
            },
            enabled_plugins: BTreeSet::new(),
            enabled_skills: BTreeSet::new(),
            skill_crons: BTreeMap::new(),
            api_keys: BTreeMap::new(),
        })
    }

    #[tokio::test]
    async fn test_insert_patch_remove() {
        let store = MemoryStore::new();
        let rec = record();
        store.insert(&rec).await.unwrap();
        assert!(store.insert(&rec).await.is_err());

        let failed = RecordPatch {
            status: Some(DeploymentStatus::Error),
            error: Some(Some("create_vm: quota".into())),
            ..Default::default()
        };
        let patched = store.patch(&rec.id, &failed).await.unwrap();
        assert_eq!(patched.status, DeploymentStatus::Error);
        assert_eq!(patched.error.as_deref(), Some("create_vm: quota"));
        assert_eq!(patched.vm_name, rec.vm_name);
        assert!(patched.updated_at >= rec.updated_at);

        let clean = RecordPatch {
            status: Some(DeploymentStatus::Running),
            error: Some(None),
            ..Default::default()
        };
        let cleared = store.patch(&rec.id, &clean).await.unwrap();
        assert!(cleared.error.is_none());

        store
            .put_secret_ref(&SecretReference {
                deployment_id: rec.id.clone(),
                secret_name: "telegram-bot-token".into(),
                rotated_at: Utc::now(),
            })
            .await
            .unwrap();
        store.remove(&rec.id).await.unwrap();
        assert!(store.get(&rec.id).await.unwrap().is_none());
        assert!(store.secret_refs(&rec.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configs_require_record() {
        let store = MemoryStore::new();
        let err = store
            .set_plugin_config(&PluginConfig {
                deployment_id: "missing".into(),
                plugin_id: "postiz".into(),
                enabled: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store.insert(&record()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        store.set_fail_writes(false);
        assert!(store.insert(&record()).await.is_ok());
    }
}
