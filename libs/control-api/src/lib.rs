//! Control surface models
//!
//! Request bodies and response envelopes for the clawctl HTTP API. Every
//! operation answers with one of `{success}`, `{error}`, `{status}` or
//! `{output}`; delete additionally carries `warnings` on partial failure.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bot branding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub bot_name: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Model selection: one primary plus ordered fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Models {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// Deploy request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployBody {
    pub project_id: String,
    pub zone: String,
    pub vm_name: String,
    pub machine_type: String,
    pub branding: Branding,
    pub models: Models,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Per-skill cron overrides
    #[serde(default)]
    pub skill_crons: BTreeMap<String, String>,
    /// Secret slot name -> raw value
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
}

/// Update (config-driven redeploy) request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    pub deployment_id: String,
    #[serde(default)]
    pub branding: Option<Branding>,
    #[serde(default)]
    pub models: Option<Models>,
    #[serde(default)]
    pub plugins: Option<Vec<String>>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub skill_crons: Option<BTreeMap<String, String>>,
}

/// VM power actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAction {
    Start,
    Stop,
    Reset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmActionBody {
    pub deployment_id: String,
    pub action: VmAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
    pub deployment_id: String,
    /// Physically remove the record instead of marking it deleted
    #[serde(default)]
    pub purge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBody {
    pub deployment_id: String,
    pub secret_name: String,
    pub value: String,
}

/// Query string for status and log fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentQuery {
    #[serde(alias = "deployment_id")]
    pub deployment_id: String,
}

/// `{success}` envelope, with warnings on partial failure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// `{error}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One provisioning step in a deploy response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepBody {
    pub name: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub success: bool,
    pub deployment_id: String,
    pub steps: Vec<StepBody>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Live VM status; `status` is `NOT_FOUND` when the instance is absent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

/// `{output}` envelope for serial console logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub output: String,
}

/// A required secret slot that has no stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingSecret {
    pub plugin_id: String,
    pub secret_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingConfigResponse {
    pub missing: Vec<MissingSecret>,
}

/// Deployment record summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub id: String,
    pub project_id: String,
    pub zone: String,
    pub vm_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_body_defaults() {
        let body: DeployBody = serde_json::from_str(
            r#"{
                "projectId": "p",
                "zone": "us-central1-a",
                "vmName": "claw",
                "machineType": "e2-small",
                "branding": {"botName": "Dyno"},
                "models": {"primary": "google/gemini-2.5-flash"}
            }"#,
        )
        .unwrap();
        assert!(body.plugins.is_empty());
        assert!(body.api_keys.is_empty());
        assert!(body.models.fallbacks.is_empty());
        assert_eq!(body.branding.personality, "");
    }

    #[test]
    fn test_success_response_omits_empty_warnings() {
        let json = serde_json::to_value(SuccessResponse {
            success: true,
            warnings: vec![],
        })
        .unwrap();
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_vm_action_lowercase() {
        let body: VmActionBody =
            serde_json::from_str(r#"{"deploymentId":"d","action":"reset"}"#).unwrap();
        assert_eq!(body.action, VmAction::Reset);
    }
}
