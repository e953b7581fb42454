//! IAM, Resource Manager and Service Usage models

use serde::{Deserialize, Serialize};

/// Body of `serviceAccounts.create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceAccountRequest {
    pub account_id: String,
    pub service_account: ServiceAccountFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountFields {
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAccount {
    #[serde(default)]
    pub email: String,
}

/// Project IAM policy; unknown fields are preserved for `setIamPolicy`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Policy {
    /// Add `member` to `role`; returns false when the binding already existed
    pub fn grant(&mut self, role: &str, member: &str) -> bool {
        match self.bindings.iter_mut().find(|b| b.role == role) {
            Some(binding) if binding.members.iter().any(|m| m == member) => false,
            Some(binding) => {
                binding.members.push(member.to_string());
                true
            }
            None => {
                self.bindings.push(Binding {
                    role: role.to_string(),
                    members: vec![member.to_string()],
                });
                true
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetIamPolicyRequest {
    pub policy: Policy,
}

/// Resource Manager project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub project_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_is_idempotent() {
        let mut policy = Policy::default();
        assert!(policy.grant("roles/viewer", "serviceAccount:a@p.iam"));
        assert!(!policy.grant("roles/viewer", "serviceAccount:a@p.iam"));
        assert!(policy.grant("roles/viewer", "serviceAccount:b@p.iam"));
        assert_eq!(policy.bindings.len(), 1);
        assert_eq!(policy.bindings[0].members.len(), 2);
    }

    #[test]
    fn test_policy_keeps_version_field() {
        let policy: Policy =
            serde_json::from_str(r#"{"version":3,"etag":"BwX","bindings":[]}"#).unwrap();
        let value = serde_json::to_value(&policy).unwrap();
        assert_eq!(value["version"], 3);
        assert_eq!(value["etag"], "BwX");
    }
}
