//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cloud::gcp::{Endpoints, GcpOptions, OperationPolling};
use crate::deploy::PipelineSettings;
use crate::errors::ClawError;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file under the storage layout
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP control surface
    #[serde(default)]
    pub server: ServerSettings,

    /// Google Cloud access
    #[serde(default)]
    pub gcp: GcpSettings,

    /// Provisioning defaults
    #[serde(default)]
    pub provisioning: ProvisioningSettings,

    /// Deployment record storage
    #[serde(default)]
    pub store: StoreSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            gcp: GcpSettings::default(),
            provisioning: ProvisioningSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl Settings {
    /// Reject settings that cannot work before anything starts
    pub fn validate(&self) -> Result<(), ClawError> {
        if self.server.port == 0 {
            return Err(ClawError::ConfigError("server.port must not be 0".into()));
        }
        let endpoints = &self.gcp.endpoints;
        for (name, value) in [
            ("compute", &endpoints.compute),
            ("secret_manager", &endpoints.secret_manager),
            ("service_usage", &endpoints.service_usage),
            ("iam", &endpoints.iam),
            ("resource_manager", &endpoints.resource_manager),
        ] {
            let url = url::Url::parse(value).map_err(|e| {
                ClawError::ConfigError(format!("gcp.endpoints.{}: {}", name, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ClawError::ConfigError(format!(
                    "gcp.endpoints.{}: unsupported scheme {}",
                    name,
                    url.scheme()
                )));
            }
        }
        let p = &self.provisioning;
        if p.health_attempts == 0 {
            return Err(ClawError::ConfigError(
                "provisioning.health_attempts must be at least 1".into(),
            ));
        }
        if p.startup_poll_interval_secs > p.startup_timeout_secs {
            return Err(ClawError::ConfigError(
                "provisioning.startup_poll_interval_secs exceeds the startup timeout".into(),
            ));
        }
        if self.store.kind == StoreKind::File && self.store.path.is_none() {
            return Err(ClawError::ConfigError(
                "store.path is required for the file store".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests from any origin
    #[serde(default = "default_true")]
    pub permissive_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8085
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            permissive_cors: true,
        }
    }
}

/// Google Cloud API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpSettings {
    /// File holding an OAuth access token, kept fresh by an external refresher.
    /// Takes precedence over `token_env`.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Environment variable holding an OAuth access token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_operation_poll_attempts")]
    pub operation_poll_attempts: u32,

    #[serde(default = "default_operation_poll_interval")]
    pub operation_poll_interval_secs: u64,

    #[serde(default)]
    pub endpoints: EndpointSettings,
}

fn default_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_operation_poll_attempts() -> u32 {
    30
}

fn default_operation_poll_interval() -> u64 {
    2
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            token_file: None,
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout(),
            operation_poll_attempts: default_operation_poll_attempts(),
            operation_poll_interval_secs: default_operation_poll_interval(),
            endpoints: EndpointSettings::default(),
        }
    }
}

impl GcpSettings {
    pub fn to_options(&self) -> GcpOptions {
        GcpOptions {
            endpoints: Endpoints {
                compute: self.endpoints.compute.clone(),
                secret_manager: self.endpoints.secret_manager.clone(),
                service_usage: self.endpoints.service_usage.clone(),
                iam: self.endpoints.iam.clone(),
                resource_manager: self.endpoints.resource_manager.clone(),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            polling: OperationPolling {
                attempts: self.operation_poll_attempts,
                interval: Duration::from_secs(self.operation_poll_interval_secs),
            },
        }
    }
}

/// API base URLs; overridable for emulators and proxies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    #[serde(default = "default_compute")]
    pub compute: String,
    #[serde(default = "default_secret_manager")]
    pub secret_manager: String,
    #[serde(default = "default_service_usage")]
    pub service_usage: String,
    #[serde(default = "default_iam")]
    pub iam: String,
    #[serde(default = "default_resource_manager")]
    pub resource_manager: String,
}

fn default_compute() -> String {
    Endpoints::default().compute
}

fn default_secret_manager() -> String {
    Endpoints::default().secret_manager
}

fn default_service_usage() -> String {
    Endpoints::default().service_usage
}

fn default_iam() -> String {
    Endpoints::default().iam
}

fn default_resource_manager() -> String {
    Endpoints::default().resource_manager
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            compute: default_compute(),
            secret_manager: default_secret_manager(),
            service_usage: default_service_usage(),
            iam: default_iam(),
            resource_manager: default_resource_manager(),
        }
    }
}

/// Provisioning pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_startup_poll_interval")]
    pub startup_poll_interval_secs: u64,

    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,

    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    #[serde(default = "default_service_account_id")]
    pub service_account_id: String,

    #[serde(default = "default_network_tag")]
    pub network_tag: String,

    #[serde(default = "default_router_name")]
    pub router_name: String,

    #[serde(default = "default_nat_name")]
    pub nat_name: String,

    #[serde(default = "default_source_image")]
    pub source_image: String,
}

fn default_startup_timeout() -> u64 {
    300
}

fn default_startup_poll_interval() -> u64 {
    10
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_interval() -> u64 {
    15
}

fn default_service_account_id() -> String {
    PipelineSettings::default().service_account_id
}

fn default_network_tag() -> String {
    PipelineSettings::default().network_tag
}

fn default_router_name() -> String {
    PipelineSettings::default().router_name
}

fn default_nat_name() -> String {
    PipelineSettings::default().nat_name
}

fn default_source_image() -> String {
    PipelineSettings::default().source_image
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout(),
            startup_poll_interval_secs: default_startup_poll_interval(),
            health_attempts: default_health_attempts(),
            health_interval_secs: default_health_interval(),
            service_account_id: default_service_account_id(),
            network_tag: default_network_tag(),
            router_name: default_router_name(),
            nat_name: default_nat_name(),
            source_image: default_source_image(),
        }
    }
}

impl ProvisioningSettings {
    pub fn to_pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            service_account_id: self.service_account_id.clone(),
            network_tag: self.network_tag.clone(),
            router_name: self.router_name.clone(),
            nat_name: self.nat_name.clone(),
            source_image: self.source_image.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            startup_poll_interval: Duration::from_secs(self.startup_poll_interval_secs),
            health_attempts: self.health_attempts,
            health_interval: Duration::from_secs(self.health_interval_secs),
            ..PipelineSettings::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// Deployment store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,

    /// JSON file for the file store; relative to the storage directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}
