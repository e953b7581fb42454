//! Boot payload assembly
//!
//! Turns branding, models and the enabled plugin and skill sets into the
//! startup script a VM runs on every boot. Assembly is pure: the same
//! [`BootConfig`] always yields the same script body, which lets an update
//! regenerate the payload and compare it against what a VM already carries.
//! Secret values never enter the payload; the script fetches every known
//! slot by name from Secret Manager at boot.

pub mod markers;
mod script;

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ClawError;
use crate::models::deployment::{
    validate_branding, validate_cron, validate_models, validate_project_id,
};
use crate::models::{
    Branding, DeploymentRecord, DeploymentRequest, Models, PluginConfig, SkillConfig,
};
use crate::registry::Registry;
use crate::utils::sha256_hash;

pub use script::RUNTIME_VERSION;

/// Instance metadata key the payload is stored under
pub const STARTUP_SCRIPT_KEY: &str = "startup-script";

const MARKER_PREFIX: &str = "# clawctl boot payload v";

/// Everything that shapes the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    pub project_id: String,
    pub branding: Branding,
    pub models: Models,
    pub plugins: BTreeSet<String>,
    /// Enabled skills with their cron override
    pub skills: BTreeMap<String, Option<String>>,
}

impl BootConfig {
    pub fn from_request(request: &DeploymentRequest) -> Self {
        Self {
            project_id: request.project_id.clone(),
            branding: request.branding.clone(),
            models: request.models.clone(),
            plugins: request.enabled_plugins.clone(),
            skills: request.skill_selections(),
        }
    }

    /// Rebuild from persisted state; disabled rows are ignored
    pub fn from_record(
        record: &DeploymentRecord,
        plugins: &[PluginConfig],
        skills: &[SkillConfig],
    ) -> Self {
        Self {
            project_id: record.project_id.clone(),
            branding: record.branding.clone(),
            models: record.models.clone(),
            plugins: plugins
                .iter()
                .filter(|p| p.enabled)
                .map(|p| p.plugin_id.clone())
                .collect(),
            skills: skills
                .iter()
                .filter(|s| s.enabled)
                .map(|s| (s.skill_id.clone(), s.cron_override.clone()))
                .collect(),
        }
    }
}

/// An assembled startup script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootPayload {
    pub script: String,
    /// The version marker line
    pub marker: String,
    /// SHA-256 of the script without the marker line
    pub fingerprint: String,
}

fn strip_marker(script: &str) -> String {
    script
        .split_inclusive('\n')
        .filter(|line| !line.starts_with(MARKER_PREFIX))
        .collect()
}

/// Fingerprint of any startup script, comparable to [`BootPayload::fingerprint`]
pub fn fingerprint_of(script: &str) -> String {
    sha256_hash(strip_marker(script).as_bytes())
}

/// Build the startup script for `config`
pub fn assemble(config: &BootConfig, registry: &Registry) -> Result<BootPayload, ClawError> {
    validate_project_id(&config.project_id)?;
    validate_branding(&config.branding)?;
    validate_models(&config.models)?;
    registry.validate_plugins(&config.plugins)?;
    registry.validate_skills(config.skills.keys())?;
    for (skill, cron) in &config.skills {
        if let Some(cron) = cron {
            validate_cron(skill, cron)?;
        }
    }

    let marker = format!("{}{}", MARKER_PREFIX, env!("CARGO_PKG_VERSION"));
    let secret_names = registry.known_secret_names();

    let mut out = String::with_capacity(16 * 1024);
    out.push_str(script::SHEBANG);
    out.push('\n');
    out.push_str(&marker);
    out.push('\n');
    out.push_str(&script::preamble());
    out.push_str(script::runtime());
    out.push_str(&script::secrets(&config.project_id, secret_names));
    out.push_str(&script::plugins(&config.plugins));
    out.push_str(&script::skills(&config.skills, registry));
    out.push_str(&script::agent_config(config, registry, secret_names)?);
    out.push_str(script::auth_profiles());
    out.push_str(&script::service(&config.branding.bot_name));

    let fingerprint = fingerprint_of(&out);
    Ok(BootPayload {
        script: out,
        marker,
        fingerprint,
    })
}
