//! Plugin and skill registry
//!
//! One canonical, read-only table of the plugins and skills a deployment can
//! enable, the secret slots each plugin reads, and the core slots every boot
//! fetches. Built once at first use and shared for the life of the process.

mod plugins;
mod skills;

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

pub use control_api::MissingSecret;

use crate::errors::ClawError;

/// Secret slots every boot payload fetches regardless of plugins
pub const CORE_SECRETS: &[&str] = &[
    "telegram-bot-token",
    "google-ai-api-key",
    "openai-api-key",
    "openrouter-api-key",
    "anthropic-api-key",
];

/// A plugin config key backed by a named secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretKey {
    pub config_key: &'static str,
    pub secret_name: &'static str,
}

#[derive(Debug)]
pub struct PluginMeta {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub required: &'static [SecretKey],
    pub optional: &'static [SecretKey],
}

impl PluginMeta {
    /// Required then optional keys
    pub fn keys(&self) -> impl Iterator<Item = &'static SecretKey> {
        self.required.iter().chain(self.optional.iter())
    }
}

#[derive(Debug)]
pub struct SkillMeta {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Default cron schedule; `None` means on-demand only
    pub cron: Option<&'static str>,
    pub required_plugins: &'static [&'static str],
}

/// A secret slot needed by the enabled plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredKey {
    pub plugin_id: &'static str,
    pub config_key: &'static str,
    pub secret_name: &'static str,
    pub required: bool,
}

pub struct Registry {
    plugins: HashMap<&'static str, &'static PluginMeta>,
    skills: HashMap<&'static str, &'static SkillMeta>,
    known_secrets: BTreeSet<&'static str>,
}

static BUILTIN: LazyLock<Registry> = LazyLock::new(Registry::build);

impl Registry {
    /// The process-wide registry
    pub fn builtin() -> &'static Registry {
        &BUILTIN
    }

    fn build() -> Self {
        let mut known_secrets: BTreeSet<&'static str> = CORE_SECRETS.iter().copied().collect();
        for plugin in plugins::PLUGINS {
            known_secrets.extend(plugin.keys().map(|k| k.secret_name));
        }
        Self {
            plugins: plugins::PLUGINS.iter().map(|p| (p.id, p)).collect(),
            skills: skills::SKILLS.iter().map(|s| (s.id, s)).collect(),
            known_secrets,
        }
    }

    pub fn plugin(&self, id: &str) -> Option<&'static PluginMeta> {
        self.plugins.get(id).copied()
    }

    pub fn skill(&self, id: &str) -> Option<&'static SkillMeta> {
        self.skills.get(id).copied()
    }

    pub fn plugins(&self) -> impl Iterator<Item = &'static PluginMeta> {
        plugins::PLUGINS.iter()
    }

    pub fn skills(&self) -> impl Iterator<Item = &'static SkillMeta> {
        skills::SKILLS.iter()
    }

    pub fn validate_plugins<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), ClawError> {
        for id in ids {
            if self.plugin(id).is_none() {
                return Err(ClawError::unknown_plugin(id.as_str()));
            }
        }
        Ok(())
    }

    pub fn validate_skills<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), ClawError> {
        for id in ids {
            if self.skill(id).is_none() {
                return Err(ClawError::unknown_skill(id.as_str()));
            }
        }
        Ok(())
    }

    /// Secret slots read by the enabled plugins, deduplicated by secret name.
    /// A slot that any enabled plugin requires is reported as required.
    pub fn required_keys<'a>(&self, enabled: impl IntoIterator<Item = &'a String>) -> Vec<RequiredKey> {
        let mut keys: Vec<RequiredKey> = Vec::new();
        for plugin in enabled.into_iter().filter_map(|id| self.plugin(id)) {
            let flagged = plugin
                .required
                .iter()
                .map(|k| (k, true))
                .chain(plugin.optional.iter().map(|k| (k, false)));
            for (key, required) in flagged {
                match keys.iter_mut().find(|k| k.secret_name == key.secret_name) {
                    Some(existing) => existing.required |= required,
                    None => keys.push(RequiredKey {
                        plugin_id: plugin.id,
                        config_key: key.config_key,
                        secret_name: key.secret_name,
                        required,
                    }),
                }
            }
        }
        keys
    }

    /// Required slots of the enabled plugins that have no stored value
    pub fn missing_secrets<'a>(
        &self,
        enabled: impl IntoIterator<Item = &'a String>,
        present: &BTreeSet<String>,
    ) -> Vec<MissingSecret> {
        self.required_keys(enabled)
            .into_iter()
            .filter(|k| k.required && !present.contains(k.secret_name))
            .map(|k| MissingSecret {
                plugin_id: k.plugin_id.to_string(),
                secret_name: k.secret_name.to_string(),
            })
            .collect()
    }

    /// One warning per enabled skill whose required plugin is not enabled
    pub fn missing_skill_dependencies<'a>(
        &self,
        skills: impl IntoIterator<Item = &'a String>,
        plugins: &BTreeSet<String>,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        for skill in skills.into_iter().filter_map(|id| self.skill(id)) {
            for dep in skill.required_plugins {
                if !plugins.contains(*dep) {
                    warnings.push(format!(
                        "skill {} requires plugin {} which is not enabled",
                        skill.id, dep
                    ));
                }
            }
        }
        warnings
    }

    /// Core slots plus every catalog key, sorted
    pub fn known_secret_names(&self) -> &BTreeSet<&'static str> {
        &self.known_secrets
    }

    pub fn is_known_secret(&self, name: &str) -> bool {
        self.known_secrets.contains(name)
    }
}

/// Environment variable a secret slot is exported as on the VM
pub fn env_var_name(secret_name: &str) -> String {
    secret_name.to_ascii_uppercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_lookup() {
        let registry = Registry::builtin();
        assert_eq!(registry.plugin("postiz").map(|p| p.required.len()), Some(2));
        assert_eq!(registry.skill("content-engine").and_then(|s| s.cron), Some("0 1 * * 1"));
        assert!(registry.plugin("nope").is_none());
    }

    #[test]
    fn test_validate_rejects_unknown_ids() {
        let registry = Registry::builtin();
        assert!(registry.validate_plugins(&ids(&["github", "web-tools"])).is_ok());
        let err = registry.validate_plugins(&ids(&["github", "fax"])).unwrap_err();
        assert_eq!(err.to_string(), "Unknown plugin id: fax");
        assert!(registry.validate_skills(&ids(&["time-travel"])).is_err());
    }

    #[test]
    fn test_required_keys_deduplicates_and_required_wins() {
        let registry = Registry::builtin();
        // image-gen treats convex-url as optional, convex-knowledge requires it
        let keys = registry.required_keys(&ids(&["image-gen", "convex-knowledge"]));
        let convex: Vec<_> = keys.iter().filter(|k| k.secret_name == "convex-url").collect();
        assert_eq!(convex.len(), 1);
        assert!(convex[0].required);
    }

    #[test]
    fn test_missing_secrets() {
        let registry = Registry::builtin();
        let present: BTreeSet<String> = ["postiz-url".to_string()].into_iter().collect();
        let missing = registry.missing_secrets(&ids(&["postiz", "web-tools"]), &present);
        assert_eq!(
            missing,
            vec![MissingSecret {
                plugin_id: "postiz".into(),
                secret_name: "postiz-api-key".into(),
            }]
        );
    }

    #[test]
    fn test_missing_skill_dependencies() {
        let registry = Registry::builtin();
        let plugins: BTreeSet<String> = ["postiz".to_string()].into_iter().collect();
        let warnings = registry.missing_skill_dependencies(&ids(&["daily-posts", "job-hunter"]), &plugins);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("convex-knowledge"));
    }

    #[test]
    fn test_known_secrets_cover_core_and_catalog() {
        let registry = Registry::builtin();
        assert!(registry.is_known_secret("telegram-bot-token"));
        assert!(registry.is_known_secret("github-default-owner"));
        assert!(registry.is_known_secret("gmail-oauth-refresh-token"));
        assert!(!registry.is_known_secret("root-password"));
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("google-ai-api-key"), "GOOGLE_AI_API_KEY");
    }
}
