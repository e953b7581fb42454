//! Deployment storage
//!
//! The orchestrator persists one record per deployment plus its plugin and
//! skill selections and secret references. Raw secret values never reach a
//! store. Two backends share the same in-memory data model: [`MemoryStore`]
//! for tests and dry runs, and [`JsonFileStore`] which snapshots it to disk
//! after every write.

mod file;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::errors::ClawError;
use crate::models::{
    Branding, DeploymentRecord, DeploymentStatus, Models, PluginConfig, SecretReference,
    SkillConfig,
};

/// Mutable fields of a record; identity fields have no setter here
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<DeploymentStatus>,
    /// `Some(None)` clears the error
    pub error: Option<Option<String>>,
    pub machine_type: Option<String>,
    pub branding: Option<Branding>,
    pub models: Option<Models>,
}

impl RecordPatch {
    fn apply(&self, record: &mut DeploymentRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(error) = &self.error {
            record.error = error.clone();
        }
        if let Some(machine_type) = &self.machine_type {
            record.machine_type = machine_type.clone();
        }
        if let Some(branding) = &self.branding {
            record.branding = branding.clone();
        }
        if let Some(models) = &self.models {
            record.models = models.clone();
        }
        record.updated_at = Utc::now();
    }
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>, ClawError>;

    /// All records, oldest first
    async fn list(&self) -> Result<Vec<DeploymentRecord>, ClawError>;

    async fn insert(&self, record: &DeploymentRecord) -> Result<(), ClawError>;

    /// Apply `patch` and bump `updated_at`; returns the updated record
    async fn patch(&self, id: &str, patch: &RecordPatch) -> Result<DeploymentRecord, ClawError>;

    /// Remove the record with its configs and secret references
    async fn remove(&self, id: &str) -> Result<(), ClawError>;

    async fn plugin_configs(&self, id: &str) -> Result<Vec<PluginConfig>, ClawError>;

    async fn set_plugin_config(&self, config: &PluginConfig) -> Result<(), ClawError>;

    async fn skill_configs(&self, id: &str) -> Result<Vec<SkillConfig>, ClawError>;

    async fn set_skill_config(&self, config: &SkillConfig) -> Result<(), ClawError>;

    async fn secret_refs(&self, id: &str) -> Result<Vec<SecretReference>, ClawError>;

    /// Insert or refresh the reference for `(deployment_id, secret_name)`
    async fn put_secret_ref(&self, reference: &SecretReference) -> Result<(), ClawError>;
}

/// Everything a store holds, keyed by deployment id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    records: BTreeMap<String, DeploymentRecord>,
    #[serde(default)]
    plugins: BTreeMap<String, BTreeMap<String, PluginConfig>>,
    #[serde(default)]
    skills: BTreeMap<String, BTreeMap<String, SkillConfig>>,
    #[serde(default)]
    secrets: BTreeMap<String, BTreeMap<String, SecretReference>>,
}

impl StoreData {
    fn get(&self, id: &str) -> Option<DeploymentRecord> {
        self.records.get(id).cloned()
    }

    fn list(&self) -> Vec<DeploymentRecord> {
        let mut records: Vec<DeploymentRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    fn insert(&mut self, record: &DeploymentRecord) -> Result<(), ClawError> {
        if self.records.contains_key(&record.id) {
            return Err(ClawError::Conflict(format!("deployment {}", record.id)));
        }
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn patch(&mut self, id: &str, patch: &RecordPatch) -> Result<DeploymentRecord, ClawError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| ClawError::NotFound(format!("deployment {}", id)))?;
        patch.apply(record);
        Ok(record.clone())
    }

    fn remove(&mut self, id: &str) -> Result<(), ClawError> {
        if self.records.remove(id).is_none() {
            return Err(ClawError::NotFound(format!("deployment {}", id)));
        }
        self.plugins.remove(id);
        self.skills.remove(id);
        self.secrets.remove(id);
        Ok(())
    }

    fn require(&self, id: &str) -> Result<(), ClawError> {
        if self.records.contains_key(id) {
            Ok(())
        } else {
            Err(ClawError::NotFound(format!("deployment {}", id)))
        }
    }

    fn plugin_configs(&self, id: &str) -> Vec<PluginConfig> {
        self.plugins
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn set_plugin_config(&mut self, config: &PluginConfig) -> Result<(), ClawError> {
        self.require(&config.deployment_id)?;
        self.plugins
            .entry(config.deployment_id.clone())
            .or_default()
            .insert(config.plugin_id.clone(), config.clone());
        Ok(())
    }

    fn skill_configs(&self, id: &str) -> Vec<SkillConfig> {
        self.skills
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn set_skill_config(&mut self, config: &SkillConfig) -> Result<(), ClawError> {
        self.require(&config.deployment_id)?;
        self.skills
            .entry(config.deployment_id.clone())
            .or_default()
            .insert(config.skill_id.clone(), config.clone());
        Ok(())
    }

    fn secret_refs(&self, id: &str) -> Vec<SecretReference> {
        self.secrets
            .get(id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn put_secret_ref(&mut self, reference: &SecretReference) -> Result<(), ClawError> {
        self.require(&reference.deployment_id)?;
        self.secrets
            .entry(reference.deployment_id.clone())
            .or_default()
            .insert(reference.secret_name.clone(), reference.clone());
        Ok(())
    }
}
