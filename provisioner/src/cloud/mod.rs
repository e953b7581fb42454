//! Cloud resource client
//!
//! [`CloudApi`] is the narrow, typed facade over the provider APIs the
//! orchestrator touches. Each operation is safe to repeat: "ensure" style
//! calls reuse what exists, deletes treat an absent resource as done.

pub mod gcp;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gcp::GcpClient;
pub use memory::MemoryCloud;

use crate::utils::sha256_hash;

/// Label stamped on every instance the orchestrator creates
pub const OWNER_LABEL: &str = "clawctl-instance";

/// Classified provider failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// Network failure, timeout, rejected credentials, 502/503/504
    #[error("transport: {0}")]
    Transport(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Quota, permission or invalid argument
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
}

impl CloudError {
    pub fn is_transport(&self) -> bool {
        matches!(self, CloudError::Transport(_))
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

pub trait CloudResultExt {
    /// Treat a conflict as success; `Ok(false)` when the resource existed
    fn conflict_ok(self) -> CloudResult<bool>;
}

impl CloudResultExt for CloudResult<()> {
    fn conflict_ok(self) -> CloudResult<bool> {
        match self {
            Ok(()) => Ok(true),
            Err(CloudError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Project, zone and name of one instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceRef {
    pub fn new(project: &str, zone: &str, name: &str) -> Self {
        Self {
            project: project.to_string(),
            zone: zone.to_string(),
            name: name.to_string(),
        }
    }

    /// Lock and lookup key
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.project, self.zone, self.name)
    }

    /// Value of [`OWNER_LABEL`] for this instance; fits the 63 character
    /// lowercase label alphabet
    pub fn owner_label(&self) -> String {
        let mut digest = sha256_hash(self.key().as_bytes());
        digest.truncate(32);
        digest
    }
}

impl std::fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub target: InstanceRef,
    pub machine_type: String,
    pub source_image: String,
    pub service_account_email: String,
    pub network_tag: String,
    pub startup_script: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Live instance status as reported by Compute Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
    /// The instance does not exist
    NotFound,
    Other(String),
}

impl InstanceStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "PROVISIONING" => InstanceStatus::Provisioning,
            "STAGING" => InstanceStatus::Staging,
            "RUNNING" => InstanceStatus::Running,
            "STOPPING" => InstanceStatus::Stopping,
            "STOPPED" => InstanceStatus::Stopped,
            "SUSPENDING" => InstanceStatus::Suspending,
            "SUSPENDED" => InstanceStatus::Suspended,
            "REPAIRING" => InstanceStatus::Repairing,
            "TERMINATED" => InstanceStatus::Terminated,
            other => InstanceStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::Provisioning => "PROVISIONING",
            InstanceStatus::Staging => "STAGING",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Suspending => "SUSPENDING",
            InstanceStatus::Suspended => "SUSPENDED",
            InstanceStatus::Repairing => "REPAIRING",
            InstanceStatus::Terminated => "TERMINATED",
            InstanceStatus::NotFound => "NOT_FOUND",
            InstanceStatus::Other(s) => s,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub name: String,
    pub status: InstanceStatus,
    pub internal_ip: Option<String>,
    pub creation_timestamp: Option<String>,
    pub last_start_timestamp: Option<String>,
    pub last_stop_timestamp: Option<String>,
    /// Current `startup-script` metadata value
    pub startup_script: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl InstanceInfo {
    /// Whether the instance carries the owner label written at creation
    pub fn is_owned_by(&self, target: &InstanceRef) -> bool {
        self.labels.get(OWNER_LABEL) == Some(&target.owner_label())
    }
}

/// A window of serial console output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOutput {
    pub contents: String,
    /// Absolute byte position to pass as `start` on the next read
    pub next: u64,
}

/// Service account plus the project roles it needs
#[derive(Debug, Clone)]
pub struct ServiceAccountSpec {
    pub account_id: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallAction {
    Allow,
    Deny,
}

/// Ingress rule on the default network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub action: FirewallAction,
    pub priority: u32,
    /// `tcp`, `udp`, `all`, ...
    pub protocol: String,
    pub ports: Vec<String>,
    pub source_ranges: Vec<String>,
    pub target_tags: Vec<String>,
}

/// Cloud Router with a NAT config for egress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSpec {
    pub region: String,
    pub name: String,
    pub nat_name: String,
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn enable_api(&self, project: &str, service: &str) -> CloudResult<()>;

    /// Create or reuse the account and grant missing roles; returns its email
    async fn ensure_service_account(
        &self,
        project: &str,
        spec: &ServiceAccountSpec,
    ) -> CloudResult<String>;

    /// Create the secret if needed and add a new version
    async fn put_secret(&self, project: &str, name: &str, value: &SecretString)
        -> CloudResult<()>;

    /// Insert a firewall rule; an existing rule is a `Conflict`
    async fn set_firewall_rule(&self, project: &str, rule: &FirewallRule) -> CloudResult<()>;

    async fn ensure_router(&self, project: &str, router: &RouterSpec) -> CloudResult<()>;

    async fn create_instance(&self, spec: &InstanceSpec) -> CloudResult<CreateOutcome>;

    async fn get_instance(&self, target: &InstanceRef) -> CloudResult<Option<InstanceInfo>>;

    async fn start_instance(&self, target: &InstanceRef) -> CloudResult<()>;

    async fn stop_instance(&self, target: &InstanceRef) -> CloudResult<()>;

    async fn reset_instance(&self, target: &InstanceRef) -> CloudResult<()>;

    /// Merge one metadata item into the instance's metadata in place
    async fn set_instance_metadata(
        &self,
        target: &InstanceRef,
        key: &str,
        value: &str,
    ) -> CloudResult<()>;

    async fn delete_instance(&self, target: &InstanceRef) -> CloudResult<()>;

    async fn delete_router(&self, project: &str, region: &str, name: &str) -> CloudResult<()>;

    /// Serial port 1 output from absolute byte position `start`. The provider
    /// only retains a trailing window, so the returned output may begin
    /// later than `start`; older bytes are gone.
    async fn get_serial_port_output(
        &self,
        target: &InstanceRef,
        start: u64,
    ) -> CloudResult<ConsoleOutput>;
}
