//! Provisioning pipeline
//!
//! Turns a [`DeploymentRequest`] into a running agent VM by walking
//! [`Step::ORDER`]. Every step is idempotent, so a failed run is recovered
//! by running the same request again: existing resources are reused, a VM
//! that already exists gets the current boot payload pushed to it, and the
//! deployment record is reused rather than duplicated.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use control_api::{DeployResponse, StepBody};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fsm::{StatusEvent, StatusFsm};
use super::health::{is_retryable, ConsoleHealthProbe, HealthProbe};
use super::locks::KeyedLocks;
use super::steps::{Step, StepOutcome, StepReport};
use crate::boot::{self, markers, BootConfig, BootPayload, STARTUP_SCRIPT_KEY};
use crate::cloud::{
    CloudApi, CloudResultExt, CreateOutcome, FirewallAction, FirewallRule, InstanceRef,
    InstanceSpec, InstanceStatus, RouterSpec, ServiceAccountSpec,
};
use crate::errors::ClawError;
use crate::models::{
    DeploymentRecord, DeploymentRequest, DeploymentStatus, PluginConfig, SecretReference,
    SkillConfig,
};
use crate::registry::{MissingSecret, Registry};
use crate::store::{DeploymentStore, RecordPatch};

/// Fixed resource names and polling bounds
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Service APIs enabled on the project
    pub apis: Vec<String>,
    pub service_account_id: String,
    pub service_account_roles: Vec<String>,
    /// Network tag carried by the VM and targeted by the firewall rules
    pub network_tag: String,
    pub router_name: String,
    pub nat_name: String,
    pub source_image: String,
    /// Source range of IAP TCP forwarding
    pub iap_source_range: String,
    pub startup_timeout: Duration,
    pub startup_poll_interval: Duration,
    pub health_attempts: u32,
    pub health_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            apis: [
                "compute.googleapis.com",
                "secretmanager.googleapis.com",
                "iam.googleapis.com",
                "cloudresourcemanager.googleapis.com",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            service_account_id: "agent-sa".into(),
            service_account_roles: vec![
                "roles/secretmanager.secretAccessor".into(),
                "roles/logging.logWriter".into(),
            ],
            network_tag: "openclaw".into(),
            router_name: "openclaw-router".into(),
            nat_name: "openclaw-nat".into(),
            source_image: "projects/debian-cloud/global/images/family/debian-12".into(),
            iap_source_range: "35.235.240.0/20".into(),
            startup_timeout: Duration::from_secs(300),
            startup_poll_interval: Duration::from_secs(10),
            health_attempts: 10,
            health_interval: Duration::from_secs(15),
        }
    }
}

impl PipelineSettings {
    /// No waiting between polls; used by dry runs and tests
    pub fn immediate() -> Self {
        Self {
            startup_timeout: Duration::ZERO,
            startup_poll_interval: Duration::ZERO,
            health_attempts: 1,
            health_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn service_account(&self) -> ServiceAccountSpec {
        ServiceAccountSpec {
            account_id: self.service_account_id.clone(),
            display_name: "Agent VM service account".into(),
            roles: self.service_account_roles.clone(),
        }
    }

    /// IAP SSH allow rule and the catch-all deny below it
    pub fn firewall_rules(&self) -> [FirewallRule; 2] {
        [
            FirewallRule {
                name: "allow-iap-ssh".into(),
                action: FirewallAction::Allow,
                priority: 1000,
                protocol: "tcp".into(),
                ports: vec!["22".into()],
                source_ranges: vec![self.iap_source_range.clone()],
                target_tags: vec![self.network_tag.clone()],
            },
            FirewallRule {
                name: "deny-all-ingress".into(),
                action: FirewallAction::Deny,
                priority: 2000,
                protocol: "all".into(),
                ports: vec![],
                source_ranges: vec!["0.0.0.0/0".into()],
                target_tags: vec![self.network_tag.clone()],
            },
        ]
    }

    pub fn router(&self, region: &str) -> RouterSpec {
        RouterSpec {
            region: region.to_string(),
            name: self.router_name.clone(),
            nat_name: self.nat_name.clone(),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub deployment_id: String,
    pub steps: Vec<StepReport>,
    pub missing_secrets: Vec<MissingSecret>,
    pub warnings: Vec<String>,
    pub payload_fingerprint: String,
}

impl From<DeployReport> for DeployResponse {
    fn from(report: DeployReport) -> Self {
        let mut missing: Vec<String> = report
            .missing_secrets
            .iter()
            .map(|m| m.secret_name.clone())
            .collect();
        missing.dedup();
        DeployResponse {
            success: true,
            deployment_id: report.deployment_id,
            steps: report.steps.iter().map(StepBody::from).collect(),
            missing_secrets: missing,
            warnings: report.warnings,
        }
    }
}

/// State carried from one step to the next
struct RunContext<'a> {
    request: &'a DeploymentRequest,
    target: InstanceRef,
    payload: BootPayload,
    service_account_email: Option<String>,
    /// Secrets written by this run, referenced once the record exists
    stored_secrets: Vec<String>,
    record: Option<DeploymentRecord>,
    /// Absolute console position before this run's boot started
    console_offset: u64,
    /// Console output of this run's boot
    console: String,
    missing_secrets: Vec<MissingSecret>,
    warnings: Vec<String>,
    steps: Vec<StepReport>,
}

impl RunContext<'_> {
    fn record_id(&self) -> Result<&str, ClawError> {
        self.record
            .as_ref()
            .map(|r| r.id.as_str())
            .ok_or_else(|| ClawError::Internal("deployment record not created yet".into()))
    }
}

pub struct Pipeline {
    cloud: Arc<dyn CloudApi>,
    store: Arc<dyn DeploymentStore>,
    probe: Arc<dyn HealthProbe>,
    locks: Arc<KeyedLocks>,
    registry: &'static Registry,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        store: Arc<dyn DeploymentStore>,
        locks: Arc<KeyedLocks>,
        settings: PipelineSettings,
    ) -> Self {
        let probe = Arc::new(ConsoleHealthProbe::new(cloud.clone()));
        Self {
            cloud,
            store,
            probe,
            locks,
            registry: Registry::builtin(),
            settings,
        }
    }

    /// Replace the default console health probe
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Validate the request and assemble its payload without touching the cloud
    pub fn preflight(&self, request: &DeploymentRequest) -> Result<BootPayload, ClawError> {
        request.validate(self.registry)?;
        boot::assemble(&BootConfig::from_request(request), self.registry)
    }

    /// Run every step for `request`. Runs for the same VM are serialized.
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeployReport, ClawError> {
        let payload = self.preflight(request)?;
        let target = request.instance_ref();
        let warnings = self
            .registry
            .missing_skill_dependencies(&request.enabled_skills, &request.enabled_plugins);
        for warning in &warnings {
            warn!("{}: {}", target, warning);
        }

        let _guard = self.locks.lock(&target.key()).await;
        info!(
            "deploying {} ({} plugins, {} skills, payload {})",
            target,
            request.enabled_plugins.len(),
            request.enabled_skills.len(),
            &payload.fingerprint[..12]
        );

        let mut ctx = RunContext {
            request,
            target,
            payload,
            service_account_email: None,
            stored_secrets: Vec::new(),
            record: None,
            console_offset: 0,
            console: String::new(),
            missing_secrets: Vec::new(),
            warnings,
            steps: Vec::with_capacity(Step::ORDER.len()),
        };

        for step in Step::ORDER {
            match self.run_step(step, &mut ctx).await {
                Ok(outcome) => {
                    info!("{} {}: {}", ctx.target, step, outcome.as_str());
                    ctx.steps.push(StepReport::new(step, outcome));
                }
                Err(e) => {
                    error!("{} {} failed: {}", ctx.target, step, e);
                    ctx.steps.push(StepReport::failed(step, &e));
                    let err = ClawError::step(step.name(), e);
                    self.record_failure(&ctx, &err).await;
                    return Err(err);
                }
            }
        }

        let record = ctx
            .record
            .take()
            .ok_or_else(|| ClawError::Internal("deployment record not created".into()))?;
        let mut fsm = StatusFsm::from_record(&record);
        fsm.process(StatusEvent::ProvisionSucceeded)?;
        self.store.patch(&record.id, &fsm.patch()).await?;
        info!("{} is running as deployment {}", ctx.target, record.id);

        Ok(DeployReport {
            deployment_id: record.id,
            steps: ctx.steps,
            missing_secrets: ctx.missing_secrets,
            warnings: ctx.warnings,
            payload_fingerprint: ctx.payload.fingerprint,
        })
    }

    /// Persist a failed run. Transport failures leave the record as it was.
    async fn record_failure(&self, ctx: &RunContext<'_>, err: &ClawError) {
        let Some(record) = &ctx.record else {
            return;
        };
        if err.is_transport() {
            debug!("not recording transport failure on {}", record.id);
            return;
        }
        let mut fsm = StatusFsm::from_record(record);
        if let Err(e) = fsm.process(StatusEvent::ProvisionFailed(err.to_string())) {
            warn!("cannot mark {} failed: {}", record.id, e);
            return;
        }
        if let Err(e) = self.store.patch(&record.id, &fsm.patch()).await {
            error!("failed to record error on {}: {}", record.id, e);
        }
    }

    async fn run_step(&self, step: Step, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        match step {
            Step::EnableApis => self.enable_apis(ctx).await,
            Step::EnsureServiceAccount => self.ensure_service_account(ctx).await,
            Step::StoreSecrets => self.store_secrets(ctx).await,
            Step::ConfigureFirewall => self.configure_firewall(ctx).await,
            Step::WriteStartupScript => self.write_startup_script(ctx),
            Step::CreateVm => self.create_vm(ctx).await,
            Step::WaitForStartup => self.wait_for_startup(ctx).await,
            Step::InstallPlugins => self.install_plugins(ctx),
            Step::ConfigurePlugins => self.configure_plugins(ctx).await,
            Step::InstallSkills => self.install_skills(ctx).await,
            Step::VerifyHealth => self.verify_health(ctx).await,
        }
    }

    async fn enable_apis(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        for api in &self.settings.apis {
            self.cloud.enable_api(&ctx.request.project_id, api).await?;
        }
        Ok(StepOutcome::Ok)
    }

    async fn ensure_service_account(
        &self,
        ctx: &mut RunContext<'_>,
    ) -> Result<StepOutcome, ClawError> {
        let email = self
            .cloud
            .ensure_service_account(&ctx.request.project_id, &self.settings.service_account())
            .await?;
        debug!("using service account {}", email);
        ctx.service_account_email = Some(email);
        Ok(StepOutcome::Ok)
    }

    async fn store_secrets(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let request = ctx.request;
        for (name, value) in request.provided_secrets() {
            self.cloud.put_secret(&request.project_id, name, value).await?;
            ctx.stored_secrets.push(name.clone());
        }
        if ctx.stored_secrets.is_empty() {
            Ok(StepOutcome::Skipped)
        } else {
            Ok(StepOutcome::Ok)
        }
    }

    async fn configure_firewall(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let project = &ctx.request.project_id;
        let mut created = false;
        for rule in self.settings.firewall_rules() {
            if self.cloud.set_firewall_rule(project, &rule).await.conflict_ok()? {
                created = true;
            } else {
                debug!("firewall rule {} already exists", rule.name);
            }
        }
        self.cloud
            .ensure_router(project, &self.settings.router(ctx.request.region()))
            .await?;
        Ok(if created {
            StepOutcome::Ok
        } else {
            StepOutcome::Skipped
        })
    }

    fn write_startup_script(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        info!(
            "boot payload for {}: {} bytes, fingerprint {}",
            ctx.target,
            ctx.payload.script.len(),
            ctx.payload.fingerprint
        );
        Ok(StepOutcome::Ok)
    }

    async fn create_vm(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let email = ctx
            .service_account_email
            .clone()
            .ok_or_else(|| ClawError::Internal("service account not resolved".into()))?;
        let spec = InstanceSpec {
            target: ctx.target.clone(),
            machine_type: ctx.request.machine_type.clone(),
            source_image: self.settings.source_image.clone(),
            service_account_email: email,
            network_tag: self.settings.network_tag.clone(),
            startup_script: ctx.payload.script.clone(),
        };

        let outcome = match self.cloud.create_instance(&spec).await? {
            CreateOutcome::Created => StepOutcome::Ok,
            CreateOutcome::AlreadyExists => {
                self.refresh_existing(ctx).await?;
                StepOutcome::Skipped
            }
        };

        let record = self.claim_record(ctx.request).await?;
        let now = Utc::now();
        for name in &ctx.stored_secrets {
            self.store
                .put_secret_ref(&SecretReference {
                    deployment_id: record.id.clone(),
                    secret_name: name.clone(),
                    rotated_at: now,
                })
                .await?;
        }
        ctx.record = Some(record);
        Ok(outcome)
    }

    /// Bring an existing VM in line with the current payload
    async fn refresh_existing(&self, ctx: &mut RunContext<'_>) -> Result<(), ClawError> {
        let info = self
            .cloud
            .get_instance(&ctx.target)
            .await?
            .ok_or_else(|| ClawError::NotFound(format!("instance {}", ctx.target)))?;
        if !info.is_owned_by(&ctx.target) {
            warn!("{} exists but was not created by clawctl", ctx.target);
            return Err(ClawError::Conflict(format!(
                "instance {} already exists and is not managed by clawctl",
                ctx.target
            )));
        }
        let stale = info
            .startup_script
            .as_deref()
            .map(boot::fingerprint_of)
            .as_deref()
            != Some(ctx.payload.fingerprint.as_str());
        let stopped = DeploymentStatus::from_observed(&info.status)
            == Some(DeploymentStatus::Stopped);

        if !stale && !stopped {
            info!("{} already runs the current payload", ctx.target);
            return Ok(());
        }

        ctx.console_offset = self
            .cloud
            .get_serial_port_output(&ctx.target, 0)
            .await
            .map(|output| output.next)
            .unwrap_or(0);
        if stale {
            info!("pushing new boot payload to {}", ctx.target);
            self.cloud
                .set_instance_metadata(&ctx.target, STARTUP_SCRIPT_KEY, &ctx.payload.script)
                .await?;
        }
        if stopped {
            info!("starting stopped instance {}", ctx.target);
            self.cloud.start_instance(&ctx.target).await?;
        } else if info.status == InstanceStatus::Running {
            self.cloud.reset_instance(&ctx.target).await?;
        }
        Ok(())
    }

    /// Reuse the live record for this VM or insert a new one
    async fn claim_record(&self, request: &DeploymentRequest) -> Result<DeploymentRecord, ClawError> {
        let existing = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|r| !r.is_deleted() && r.targets(request));

        match existing {
            Some(record) => {
                debug!("reusing deployment record {}", record.id);
                let mut fsm = StatusFsm::from_record(&record);
                fsm.process(StatusEvent::ProvisionStarted)?;
                let patch = RecordPatch {
                    machine_type: Some(request.machine_type.clone()),
                    branding: Some(request.branding.clone()),
                    models: Some(request.models.clone()),
                    ..fsm.patch()
                };
                self.store.patch(&record.id, &patch).await
            }
            None => {
                let record = DeploymentRecord::new(request);
                self.store.insert(&record).await?;
                info!("created deployment record {}", record.id);
                Ok(record)
            }
        }
    }

    async fn wait_for_startup(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let timeout = self.settings.startup_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .cloud
                .get_serial_port_output(&ctx.target, ctx.console_offset)
                .await
            {
                Ok(output) => {
                    if markers::boot_complete(&output.contents) {
                        ctx.console = output.contents;
                        return Ok(StepOutcome::Ok);
                    }
                }
                Err(e) if e.is_transport() => debug!("serial output unavailable: {}", e),
                Err(crate::cloud::CloudError::NotFound(_)) => {
                    debug!("serial output not ready for {}", ctx.target)
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ClawError::StartupTimeout(format!(
                    "{} did not finish booting within {}s",
                    ctx.target,
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.settings.startup_poll_interval.min(deadline - now)).await;
        }
    }

    fn install_plugins(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        if ctx.request.enabled_plugins.is_empty() {
            return Ok(StepOutcome::Skipped);
        }
        for id in &ctx.request.enabled_plugins {
            check_mark("plugin", id, markers::plugin(&ctx.console, id))?;
        }
        Ok(StepOutcome::Ok)
    }

    async fn configure_plugins(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let id = ctx.record_id()?.to_string();
        let enabled = &ctx.request.enabled_plugins;
        let now = Utc::now();

        let stale: Vec<String> = self
            .store
            .plugin_configs(&id)
            .await?
            .into_iter()
            .filter(|c| c.enabled && !enabled.contains(&c.plugin_id))
            .map(|c| c.plugin_id)
            .collect();
        for plugin_id in enabled.iter().chain(stale.iter()) {
            self.store
                .set_plugin_config(&PluginConfig {
                    deployment_id: id.clone(),
                    plugin_id: plugin_id.clone(),
                    enabled: enabled.contains(plugin_id),
                    updated_at: now,
                })
                .await?;
        }

        let mut present: BTreeSet<String> = self
            .store
            .secret_refs(&id)
            .await?
            .into_iter()
            .map(|r| r.secret_name)
            .collect();
        present.extend(ctx.request.provided_secrets().map(|(name, _)| name.clone()));
        ctx.missing_secrets = self.registry.missing_secrets(enabled, &present);
        for missing in &ctx.missing_secrets {
            warn!(
                "{} plugin {} has no value for {}",
                ctx.target, missing.plugin_id, missing.secret_name
            );
        }

        Ok(if enabled.is_empty() && stale.is_empty() {
            StepOutcome::Skipped
        } else {
            StepOutcome::Ok
        })
    }

    async fn install_skills(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let id = ctx.record_id()?.to_string();
        let selections = ctx.request.skill_selections();
        let now = Utc::now();

        let stale: Vec<String> = self
            .store
            .skill_configs(&id)
            .await?
            .into_iter()
            .filter(|c| c.enabled && !selections.contains_key(&c.skill_id))
            .map(|c| c.skill_id)
            .collect();
        for skill_id in stale {
            self.store
                .set_skill_config(&SkillConfig {
                    deployment_id: id.clone(),
                    skill_id,
                    enabled: false,
                    cron_override: None,
                    updated_at: now,
                })
                .await?;
        }
        if selections.is_empty() {
            return Ok(StepOutcome::Skipped);
        }

        for (skill_id, cron) in &selections {
            self.store
                .set_skill_config(&SkillConfig {
                    deployment_id: id.clone(),
                    skill_id: skill_id.clone(),
                    enabled: true,
                    cron_override: cron.clone(),
                    updated_at: now,
                })
                .await?;
        }
        for skill_id in selections.keys() {
            check_mark("skill", skill_id, markers::skill(&ctx.console, skill_id))?;
        }
        Ok(StepOutcome::Ok)
    }

    async fn verify_health(&self, ctx: &mut RunContext<'_>) -> Result<StepOutcome, ClawError> {
        let attempts = self.settings.health_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match self.probe.check(&ctx.target).await {
                Ok(()) => return Ok(StepOutcome::Ok),
                Err(e) if is_retryable(&e) => {
                    debug!("health attempt {}/{} for {}: {}", attempt, attempts, ctx.target, e);
                    last = e.to_string();
                }
                Err(e) => return Err(e),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.health_interval).await;
            }
        }
        Err(ClawError::HealthCheckFailed(format!(
            "{} not healthy after {} attempts: {}",
            ctx.target, attempts, last
        )))
    }
}

fn check_mark(kind: &str, id: &str, mark: markers::InstallMark) -> Result<(), ClawError> {
    match mark {
        markers::InstallMark::Installed => Ok(()),
        markers::InstallMark::Failed => {
            Err(ClawError::InstallFailed(format!("{} {}", kind, id)))
        }
        markers::InstallMark::Missing => Err(ClawError::InstallFailed(format!(
            "{} {}: no install marker on the serial console",
            kind, id
        ))),
    }
}
