//! Lifecycle of deployed agent VMs
//!
//! Operations on a deployment that already has a record: power actions,
//! config-driven updates, teardown, live status, logs and secrets.

mod controller;

use std::collections::{BTreeMap, BTreeSet};

use control_api::{Branding, Models, StatusResponse, UpdateBody};

use crate::cloud::{InstanceInfo, InstanceStatus};

pub use controller::LifecycleController;

/// Optional changes applied by an update; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub branding: Option<Branding>,
    pub models: Option<Models>,
    pub plugins: Option<BTreeSet<String>>,
    pub skills: Option<BTreeSet<String>>,
    /// Replaces every cron override when set
    pub skill_crons: Option<BTreeMap<String, String>>,
}

impl From<UpdateBody> for ConfigChanges {
    fn from(body: UpdateBody) -> Self {
        Self {
            branding: body.branding,
            models: body.models,
            plugins: body.plugins.map(|p| p.into_iter().collect()),
            skills: body.skills.map(|s| s.into_iter().collect()),
            skill_crons: body.skill_crons,
        }
    }
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Live instance state as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStatus {
    pub status: InstanceStatus,
    pub internal_ip: Option<String>,
    pub last_start: Option<String>,
    pub last_stop: Option<String>,
    pub created: Option<String>,
}

impl LiveStatus {
    pub fn not_found() -> Self {
        Self {
            status: InstanceStatus::NotFound,
            internal_ip: None,
            last_start: None,
            last_stop: None,
            created: None,
        }
    }
}

impl From<InstanceInfo> for LiveStatus {
    fn from(info: InstanceInfo) -> Self {
        Self {
            status: info.status,
            internal_ip: info.internal_ip,
            last_start: info.last_start_timestamp,
            last_stop: info.last_stop_timestamp,
            created: info.creation_timestamp,
        }
    }
}

impl From<LiveStatus> for StatusResponse {
    fn from(live: LiveStatus) -> Self {
        StatusResponse {
            status: live.status.to_string(),
            internal_ip: live.internal_ip,
            last_start_timestamp: live.last_start,
            last_stop_timestamp: live.last_stop,
            creation_timestamp: live.created,
        }
    }
}

/// Result of a teardown; the record is always updated locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Cloud resources that could not be removed, e.g. `instance: ...`
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_from_body() {
        let changes = ConfigChanges::from(UpdateBody {
            deployment_id: "d".into(),
            plugins: Some(vec!["github".into(), "postiz".into(), "github".into()]),
            ..Default::default()
        });
        assert_eq!(changes.plugins.as_ref().map(|p| p.len()), Some(2));
        assert!(changes.branding.is_none());
        assert!(!changes.is_empty());
        assert!(ConfigChanges::default().is_empty());
    }

    #[test]
    fn test_not_found_response() {
        let body = StatusResponse::from(LiveStatus::not_found());
        assert_eq!(body.status, "NOT_FOUND");
        assert!(body.internal_ip.is_none());
    }
}
