//! Lifecycle controller

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use control_api::VmAction;
use secrecy::SecretString;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::{ConfigChanges, DeleteOutcome, LiveStatus};
use crate::boot::{self, BootConfig, BootPayload, STARTUP_SCRIPT_KEY};
use crate::cloud::{CloudApi, InstanceRef, InstanceStatus};
use crate::deploy::{KeyedLocks, PipelineSettings, StatusEvent, StatusFsm};
use crate::errors::ClawError;
use crate::models::{DeploymentRecord, DeploymentStatus, PluginConfig, SecretReference, SkillConfig};
use crate::registry::{MissingSecret, Registry};
use crate::store::{DeploymentStore, RecordPatch};

/// Control operations against existing deployments.
///
/// Every operation that writes a record holds the per-VM lock shared with
/// the provisioning pipeline. Status is only written after the provider
/// confirmed the change.
pub struct LifecycleController {
    cloud: Arc<dyn CloudApi>,
    store: Arc<dyn DeploymentStore>,
    locks: Arc<KeyedLocks>,
    registry: &'static Registry,
    router_name: String,
}

impl LifecycleController {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        store: Arc<dyn DeploymentStore>,
        locks: Arc<KeyedLocks>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            cloud,
            store,
            locks,
            registry: Registry::builtin(),
            router_name: settings.router_name.clone(),
        }
    }

    pub async fn get(&self, id: &str) -> Result<DeploymentRecord, ClawError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ClawError::NotFound(format!("deployment {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<DeploymentRecord>, ClawError> {
        self.store.list().await
    }

    /// Load a record and take its VM lock. The record is reloaded under the
    /// lock so a concurrent writer's changes are seen.
    async fn locked(&self, id: &str) -> Result<(DeploymentRecord, OwnedMutexGuard<()>), ClawError> {
        let key = self.get(id).await?.instance_ref().key();
        let guard = self.locks.lock(&key).await;
        let record = self.get(id).await?;
        Ok((record, guard))
    }

    async fn locked_live(
        &self,
        id: &str,
    ) -> Result<(DeploymentRecord, OwnedMutexGuard<()>), ClawError> {
        let (record, guard) = self.locked(id).await?;
        if record.is_deleted() {
            return Err(ClawError::ValidationError(format!(
                "deployment {} is deleted",
                id
            )));
        }
        Ok((record, guard))
    }

    async fn transition(
        &self,
        record: &DeploymentRecord,
        event: StatusEvent,
    ) -> Result<DeploymentRecord, ClawError> {
        let mut fsm = StatusFsm::from_record(record);
        fsm.process(event)?;
        self.store.patch(&record.id, &fsm.patch()).await
    }

    pub async fn start(&self, id: &str) -> Result<DeploymentRecord, ClawError> {
        let (record, _guard) = self.locked_live(id).await?;
        self.cloud.start_instance(&record.instance_ref()).await?;
        info!("started {}", record.instance_ref());
        self.transition(&record, StatusEvent::Started).await
    }

    pub async fn stop(&self, id: &str) -> Result<DeploymentRecord, ClawError> {
        let (record, _guard) = self.locked_live(id).await?;
        self.cloud.stop_instance(&record.instance_ref()).await?;
        info!("stopped {}", record.instance_ref());
        self.transition(&record, StatusEvent::Stopped).await
    }

    pub async fn reset(&self, id: &str) -> Result<DeploymentRecord, ClawError> {
        let (record, _guard) = self.locked_live(id).await?;
        self.cloud.reset_instance(&record.instance_ref()).await?;
        info!("reset {}", record.instance_ref());
        self.transition(&record, StatusEvent::Reset).await
    }

    pub async fn power(&self, id: &str, action: VmAction) -> Result<DeploymentRecord, ClawError> {
        match action {
            VmAction::Start => self.start(id).await,
            VmAction::Stop => self.stop(id).await,
            VmAction::Reset => self.reset(id).await,
        }
    }

    /// Apply `changes`, regenerate the boot payload and reboot the VM with it.
    /// Project, zone and VM name never change.
    pub async fn update(
        &self,
        id: &str,
        changes: ConfigChanges,
    ) -> Result<BootPayload, ClawError> {
        let (record, _guard) = self.locked_live(id).await?;
        let mut fsm = StatusFsm::from_record(&record);
        fsm.process(StatusEvent::Updated)?;

        let plugin_rows = self.store.plugin_configs(id).await?;
        let skill_rows = self.store.skill_configs(id).await?;
        let current = BootConfig::from_record(&record, &plugin_rows, &skill_rows);
        let next = apply_changes(&current, &changes);
        // assembly validates the whole config before anything is written
        let payload = boot::assemble(&next, self.registry)?;

        let target = record.instance_ref();
        self.cloud
            .set_instance_metadata(&target, STARTUP_SCRIPT_KEY, &payload.script)
            .await?;
        // rows are written only once the VM holds the new payload
        self.persist_config(&record, &current, &next).await?;

        let live = self
            .cloud
            .get_instance(&target)
            .await?
            .ok_or_else(|| ClawError::NotFound(format!("instance {}", target)))?;
        if DeploymentStatus::from_observed(&live.status) == Some(DeploymentStatus::Stopped) {
            self.cloud.start_instance(&target).await?;
        } else {
            self.cloud.reset_instance(&target).await?;
        }
        info!(
            "updated {} with payload {}",
            target,
            &payload.fingerprint[..12]
        );

        self.store.patch(id, &fsm.patch()).await?;
        Ok(payload)
    }

    async fn persist_config(
        &self,
        record: &DeploymentRecord,
        current: &BootConfig,
        next: &BootConfig,
    ) -> Result<(), ClawError> {
        if next.branding != current.branding || next.models != current.models {
            let patch = RecordPatch {
                branding: Some(next.branding.clone()),
                models: Some(next.models.clone()),
                ..Default::default()
            };
            self.store.patch(&record.id, &patch).await?;
        }

        let now = Utc::now();
        for plugin_id in next.plugins.union(&current.plugins) {
            self.store
                .set_plugin_config(&PluginConfig {
                    deployment_id: record.id.clone(),
                    plugin_id: plugin_id.clone(),
                    enabled: next.plugins.contains(plugin_id),
                    updated_at: now,
                })
                .await?;
        }
        let skill_ids: BTreeSet<&String> = next.skills.keys().chain(current.skills.keys()).collect();
        for skill_id in skill_ids {
            let selected = next.skills.get(skill_id);
            self.store
                .set_skill_config(&SkillConfig {
                    deployment_id: record.id.clone(),
                    skill_id: skill_id.clone(),
                    enabled: selected.is_some(),
                    cron_override: selected.cloned().flatten(),
                    updated_at: now,
                })
                .await?;
        }
        Ok(())
    }

    /// Best-effort teardown. Cloud failures become warnings; the record is
    /// marked deleted, or removed with its rows when `purge` is set.
    pub async fn delete(&self, id: &str, purge: bool) -> Result<DeleteOutcome, ClawError> {
        let (record, _guard) = self.locked(id).await?;
        let target = record.instance_ref();
        let mut warnings = Vec::new();

        if let Err(e) = self.cloud.delete_instance(&target).await {
            warn!("failed to delete instance {}: {}", target, e);
            warnings.push(format!("instance: {}", e));
        }

        let shared = self.store.list().await?.into_iter().any(|other| {
            other.id != record.id
                && !other.is_deleted()
                && other.project_id == record.project_id
                && other.region() == record.region()
        });
        if shared {
            info!(
                "keeping router {} in {}, other deployments use it",
                self.router_name,
                record.region()
            );
        } else if let Err(e) = self
            .cloud
            .delete_router(&record.project_id, record.region(), &self.router_name)
            .await
        {
            warn!("failed to delete router {}: {}", self.router_name, e);
            warnings.push(format!("router: {}", e));
        }

        if purge {
            self.store.remove(id).await?;
            info!("purged deployment {}", id);
        } else {
            self.transition(&record, StatusEvent::Deleted).await?;
            info!("deleted deployment {}", id);
        }
        Ok(DeleteOutcome { warnings })
    }

    /// Live status from the provider. A confirmed running or stopped
    /// observation is written back when the record disagrees. Never waits
    /// for a deploy or update in progress on the same VM.
    pub async fn status(&self, id: &str) -> Result<LiveStatus, ClawError> {
        let record = self.get(id).await?;
        let target = record.instance_ref();
        let live = match self.cloud.get_instance(&target).await? {
            Some(info) => LiveStatus::from(info),
            None => return Ok(LiveStatus::not_found()),
        };
        if !record.is_deleted() {
            self.reconcile(id, &target, &live.status).await?;
        }
        Ok(live)
    }

    async fn reconcile(
        &self,
        id: &str,
        target: &InstanceRef,
        observed: &InstanceStatus,
    ) -> Result<(), ClawError> {
        let Some(_guard) = self.locks.try_lock(&target.key()) else {
            debug!("{} is busy, not reconciling deployment {}", target, id);
            return Ok(());
        };
        let Some(record) = self.store.get(id).await? else {
            return Ok(());
        };
        if record.is_deleted() {
            return Ok(());
        }

        let mut fsm = StatusFsm::from_record(&record);
        fsm.process(StatusEvent::Observed(observed.clone()))?;
        if fsm.status() != record.status {
            info!(
                "deployment {} observed {}, was {}",
                id, observed, record.status
            );
            self.store.patch(id, &fsm.patch()).await?;
        }
        Ok(())
    }

    /// Serial console output of the VM
    pub async fn logs(&self, id: &str) -> Result<String, ClawError> {
        let record = self.get(id).await?;
        let output = self
            .cloud
            .get_serial_port_output(&record.instance_ref(), 0)
            .await?;
        Ok(output.contents)
    }

    /// Store a secret value in Secret Manager and reference it from the record
    pub async fn create_secret(
        &self,
        id: &str,
        name: &str,
        value: &SecretString,
    ) -> Result<SecretReference, ClawError> {
        if !self.registry.is_known_secret(name) {
            return Err(ClawError::unknown_secret(name));
        }
        let (record, _guard) = self.locked_live(id).await?;
        self.cloud.put_secret(&record.project_id, name, value).await?;
        let reference = SecretReference {
            deployment_id: record.id.clone(),
            secret_name: name.to_string(),
            rotated_at: Utc::now(),
        };
        self.store.put_secret_ref(&reference).await?;
        debug!("stored secret {} for {}", name, id);
        Ok(reference)
    }

    /// Required secret slots of the enabled plugins with no stored value
    pub async fn missing_configuration(&self, id: &str) -> Result<Vec<MissingSecret>, ClawError> {
        self.get(id).await?;
        let enabled: Vec<String> = self
            .store
            .plugin_configs(id)
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| c.plugin_id)
            .collect();
        let present: BTreeSet<String> = self
            .store
            .secret_refs(id)
            .await?
            .into_iter()
            .map(|r| r.secret_name)
            .collect();
        Ok(self.registry.missing_secrets(&enabled, &present))
    }
}

/// `current` with `changes` applied
fn apply_changes(current: &BootConfig, changes: &ConfigChanges) -> BootConfig {
    let skills: BTreeMap<String, Option<String>> = match (&changes.skills, &changes.skill_crons) {
        (None, None) => current.skills.clone(),
        (skills, crons) => {
            let ids: BTreeSet<String> = skills
                .clone()
                .unwrap_or_else(|| current.skills.keys().cloned().collect());
            ids.into_iter()
                .map(|skill| {
                    let cron = match crons {
                        Some(crons) => crons.get(&skill).cloned(),
                        None => current.skills.get(&skill).cloned().flatten(),
                    };
                    (skill, cron)
                })
                .collect()
        }
    };

    BootConfig {
        project_id: current.project_id.clone(),
        branding: changes
            .branding
            .clone()
            .unwrap_or_else(|| current.branding.clone()),
        models: changes.models.clone().unwrap_or_else(|| current.models.clone()),
        plugins: changes
            .plugins
            .clone()
            .unwrap_or_else(|| current.plugins.clone()),
        skills,
    }
}
