//! Deployment models

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub use control_api::{Branding, Models};
use control_api::{DeployBody, DeploymentSummary};

use crate::cloud::{InstanceRef, InstanceStatus};
use crate::errors::ClawError;
use crate::registry::Registry;
use crate::utils::generate_uuid;

/// A declarative request to bring up one agent VM. Never persisted.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub project_id: String,
    pub zone: String,
    pub vm_name: String,
    pub machine_type: String,
    pub branding: Branding,
    pub models: Models,
    pub enabled_plugins: BTreeSet<String>,
    pub enabled_skills: BTreeSet<String>,
    /// Cron overrides keyed by skill id
    pub skill_crons: BTreeMap<String, String>,
    /// Secret slot name -> raw value
    pub api_keys: BTreeMap<String, SecretString>,
}

impl From<DeployBody> for DeploymentRequest {
    fn from(body: DeployBody) -> Self {
        Self {
            project_id: body.project_id.trim().to_string(),
            zone: body.zone.trim().to_string(),
            vm_name: body.vm_name.trim().to_string(),
            machine_type: body.machine_type.trim().to_string(),
            branding: body.branding,
            models: body.models,
            enabled_plugins: body.plugins.into_iter().collect(),
            enabled_skills: body.skills.into_iter().collect(),
            skill_crons: body.skill_crons,
            api_keys: body
                .api_keys
                .into_iter()
                .map(|(name, value)| (name, SecretString::from(value)))
                .collect(),
        }
    }
}

impl DeploymentRequest {
    /// Check shape and registry membership; makes no cloud calls
    pub fn validate(&self, registry: &Registry) -> Result<(), ClawError> {
        validate_project_id(&self.project_id)?;
        validate_zone(&self.zone)?;
        validate_resource_name("vm name", &self.vm_name)?;
        validate_resource_name("machine type", &self.machine_type)?;
        validate_branding(&self.branding)?;
        validate_models(&self.models)?;

        registry.validate_plugins(&self.enabled_plugins)?;
        registry.validate_skills(&self.enabled_skills)?;
        validate_crons(&self.skill_crons, &self.enabled_skills)?;

        for name in self.api_keys.keys() {
            if !registry.is_known_secret(name) {
                return Err(ClawError::ValidationError(format!(
                    "unknown secret slot: {}",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn region(&self) -> &str {
        region_of(&self.zone)
    }

    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef::new(&self.project_id, &self.zone, &self.vm_name)
    }

    /// Enabled skills with their cron override, if any
    pub fn skill_selections(&self) -> BTreeMap<String, Option<String>> {
        self.enabled_skills
            .iter()
            .map(|id| (id.clone(), self.skill_crons.get(id).cloned()))
            .collect()
    }

    /// Secrets with a non-empty value
    pub fn provided_secrets(&self) -> impl Iterator<Item = (&String, &SecretString)> {
        self.api_keys
            .iter()
            .filter(|(_, value)| !value.expose_secret().is_empty())
    }
}

/// Persisted deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Provisioning,
    Running,
    Stopped,
    Error,
    Deleted,
}

impl DeploymentStatus {
    /// Record status implied by a live provider observation, if any
    pub fn from_observed(status: &InstanceStatus) -> Option<Self> {
        match status {
            InstanceStatus::Running => Some(DeploymentStatus::Running),
            InstanceStatus::Stopped | InstanceStatus::Terminated | InstanceStatus::Suspended => {
                Some(DeploymentStatus::Stopped)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Error => "error",
            DeploymentStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted intent and last known state of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub project_id: String,
    pub zone: String,
    pub vm_name: String,
    pub machine_type: String,
    pub branding: Branding,
    pub models: Models,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(request: &DeploymentRequest) -> Self {
        let now = Utc::now();
        Self {
            id: generate_uuid(),
            project_id: request.project_id.clone(),
            zone: request.zone.clone(),
            vm_name: request.vm_name.clone(),
            machine_type: request.machine_type.clone(),
            branding: request.branding.clone(),
            models: request.models.clone(),
            status: DeploymentStatus::Provisioning,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn region(&self) -> &str {
        region_of(&self.zone)
    }

    pub fn instance_ref(&self) -> InstanceRef {
        InstanceRef::new(&self.project_id, &self.zone, &self.vm_name)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == DeploymentStatus::Deleted
    }

    /// Same project, zone and VM name as the request
    pub fn targets(&self, request: &DeploymentRequest) -> bool {
        self.project_id == request.project_id
            && self.zone == request.zone
            && self.vm_name == request.vm_name
    }

    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            zone: self.zone.clone(),
            vm_name: self.vm_name.clone(),
            status: self.status.to_string(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub deployment_id: String,
    pub plugin_id: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillConfig {
    pub deployment_id: String,
    pub skill_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub cron_override: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Pointer to a value held in Secret Manager; the value itself is never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub deployment_id: String,
    pub secret_name: String,
    pub rotated_at: DateTime<Utc>,
}

/// Region of a zone: `us-central1-a` -> `us-central1`
pub fn region_of(zone: &str) -> &str {
    zone.rsplit_once('-').map(|(region, _)| region).unwrap_or(zone)
}

pub(crate) fn validate_project_id(project_id: &str) -> Result<(), ClawError> {
    let valid = (6..=30).contains(&project_id.len())
        && project_id.starts_with(|c: char| c.is_ascii_lowercase())
        && !project_id.ends_with('-')
        && project_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ClawError::ValidationError(format!(
            "invalid project id: {:?}",
            project_id
        )))
    }
}

fn validate_zone(zone: &str) -> Result<(), ClawError> {
    let valid = match zone.rsplit_once('-') {
        Some((region, suffix)) => {
            region.contains('-')
                && region
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && suffix.len() == 1
                && suffix.chars().all(|c| c.is_ascii_lowercase())
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ClawError::ValidationError(format!("invalid zone: {:?}", zone)))
    }
}

/// Compute resource names: `[a-z]([-a-z0-9]{0,61}[a-z0-9])?`
fn validate_resource_name(what: &str, name: &str) -> Result<(), ClawError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ClawError::ValidationError(format!("invalid {}: {:?}", what, name)))
    }
}

pub(crate) fn validate_branding(branding: &Branding) -> Result<(), ClawError> {
    if branding.bot_name.trim().is_empty() {
        return Err(ClawError::ValidationError("bot name is required".into()));
    }
    Ok(())
}

pub(crate) fn validate_models(models: &Models) -> Result<(), ClawError> {
    if models.primary.trim().is_empty() {
        return Err(ClawError::ValidationError("primary model is required".into()));
    }
    for model in std::iter::once(&models.primary).chain(models.fallbacks.iter()) {
        if model.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ClawError::ValidationError(format!(
                "invalid model id: {:?}",
                model
            )));
        }
    }
    Ok(())
}

/// Five in-range cron fields; overrides must name an enabled skill
pub(crate) fn validate_crons(
    crons: &BTreeMap<String, String>,
    skills: &BTreeSet<String>,
) -> Result<(), ClawError> {
    for (skill, cron) in crons {
        if !skills.contains(skill) {
            return Err(ClawError::ValidationError(format!(
                "cron override for skill {} which is not enabled",
                skill
            )));
        }
        validate_cron(skill, cron)?;
    }
    Ok(())
}

/// Minute, hour, day of month, month, day of week (0 and 7 are Sunday)
const CRON_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 7)];

pub(crate) fn validate_cron(skill: &str, cron: &str) -> Result<(), ClawError> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    let valid = fields.len() == CRON_RANGES.len()
        && fields
            .iter()
            .zip(CRON_RANGES)
            .all(|(field, (min, max))| field.split(',').all(|item| cron_item(item, min, max)));
    if valid {
        Ok(())
    } else {
        Err(ClawError::ValidationError(format!(
            "invalid cron for skill {}: {:?}",
            skill, cron
        )))
    }
}

/// One list item: `*`, `n` or `a-b`, each optionally followed by `/step`
fn cron_item(item: &str, min: u32, max: u32) -> bool {
    let number = |v: &str| {
        if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        v.parse::<u32>().ok()
    };
    let bounded = |v: &str| number(v).filter(|n| (min..=max).contains(n));

    let range = match item.split_once('/') {
        Some((range, step)) => match number(step) {
            Some(step) if step >= 1 => range,
            _ => return false,
        },
        None => item,
    };
    if range == "*" {
        return true;
    }
    match range.split_once('-') {
        Some((lo, hi)) => matches!((bounded(lo), bounded(hi)), (Some(lo), Some(hi)) if lo <= hi),
        None => bounded(range).is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            project_id: "acme-agents".into(),
            zone: "us-central1-a".into(),
            vm_name: "claw-vm".into(),
            machine_type: "e2-small".into(),
            branding: Branding {
                bot_name: "Dyno".into(),
                personality: "helpful".into(),
                system_prompt: None,
            },
            models: Models {
                primary: "google/gemini-2.5-flash".into(),
                fallbacks: vec![],
            },
            enabled_plugins: BTreeSet::new(),
            enabled_skills: BTreeSet::new(),
            skill_crons: BTreeMap::new(),
            api_keys: BTreeMap::new(),
        }
    }

    #[test]
    fn test_region_of() {
        assert_eq!(region_of("us-central1-a"), "us-central1");
        assert_eq!(region_of("europe-west4-c"), "europe-west4");
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate(Registry::builtin()).is_ok());
    }

    #[test]
    fn test_invalid_vm_names() {
        let too_long = "a".repeat(64);
        for name in ["", "Claw", "1claw", "claw-", "claw_vm", too_long.as_str()] {
            let mut req = request();
            req.vm_name = name.to_string();
            let err = req.validate(Registry::builtin()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{}", name);
        }
    }

    #[test]
    fn test_invalid_zone() {
        for zone in ["us-central1", "uscentral1-a", "us-central1-ab", "us-central1-1"] {
            let mut req = request();
            req.zone = zone.to_string();
            assert!(req.validate(Registry::builtin()).is_err(), "{}", zone);
        }
    }

    #[test]
    fn test_unknown_plugin_is_registry_error() {
        let mut req = request();
        req.enabled_plugins.insert("fax".into());
        let err = req.validate(Registry::builtin()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownRegistryId);
    }

    #[test]
    fn test_unknown_secret_slot_rejected() {
        let mut req = request();
        req.api_keys
            .insert("root-password".into(), SecretString::from("x".to_string()));
        assert!(req.validate(Registry::builtin()).is_err());
    }

    #[test]
    fn test_cron_override_validation() {
        let mut req = request();
        req.enabled_skills.insert("daily-briefing".into());
        req.skill_crons
            .insert("daily-briefing".into(), "30 7 * * 1-5".into());
        assert!(req.validate(Registry::builtin()).is_ok());

        req.skill_crons
            .insert("daily-briefing".into(), "0 7 * * *; rm -rf /".into());
        assert!(req.validate(Registry::builtin()).is_err());

        let mut req = request();
        req.skill_crons.insert("job-hunter".into(), "0 7 * * *".into());
        assert!(req.validate(Registry::builtin()).is_err());
    }

    #[test]
    fn test_cron_fields_are_range_checked() {
        for cron in ["0 13 * * *", "*/15 0-6 1,15 * 1-5", "59 23 31 12 7", "5/10 * * 1-12/3 0"] {
            assert!(validate_cron("daily-briefing", cron).is_ok(), "{}", cron);
        }
        for cron in [
            "99 99 * * *",
            "0 24 * * *",
            "0 0 0 * *",
            "0 0 * 13 *",
            "0 0 * * 8",
            "10-5 * * * *",
            "*/0 * * * *",
            "+5 * * * *",
            "1,,2 * * * *",
            "0 7 * *",
        ] {
            assert!(validate_cron("daily-briefing", cron).is_err(), "{}", cron);
        }
    }

    #[test]
    fn test_blank_bot_name_rejected() {
        let mut req = request();
        req.branding.bot_name = "  ".into();
        assert!(req.validate(Registry::builtin()).is_err());
    }

    #[test]
    fn test_provided_secrets_skip_empty_values() {
        let mut req = request();
        req.api_keys
            .insert("telegram-bot-token".into(), SecretString::from("t".to_string()));
        req.api_keys
            .insert("openai-api-key".into(), SecretString::from(String::new()));
        let names: Vec<_> = req.provided_secrets().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["telegram-bot-token"]);
    }

    #[test]
    fn test_status_from_observed() {
        assert_eq!(
            DeploymentStatus::from_observed(&InstanceStatus::Terminated),
            Some(DeploymentStatus::Stopped)
        );
        assert_eq!(DeploymentStatus::from_observed(&InstanceStatus::Staging), None);
        assert_eq!(DeploymentStatus::from_observed(&InstanceStatus::NotFound), None);
    }
}
