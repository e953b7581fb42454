//! Error types for clawctl

use thiserror::Error;

use crate::cloud::CloudError;

/// Which registry table an unknown id was looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Plugin,
    Skill,
    Secret,
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryKind::Plugin => write!(f, "plugin"),
            RegistryKind::Skill => write!(f, "skill"),
            RegistryKind::Secret => write!(f, "secret"),
        }
    }
}

/// Coarse classification used by callers that branch on failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Conflict,
    NotFound,
    StartupTimeout,
    HealthCheckFailed,
    UnknownRegistryId,
    Validation,
    InstallFailed,
    Cloud,
    Storage,
    Internal,
}

/// Main error type for clawctl
#[derive(Error, Debug)]
pub enum ClawError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Network failure, timeout, rejected credentials or 5xx gateway error
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cloud API error ({status}): {message}")]
    Cloud { status: u16, message: String },

    #[error("Startup timeout: {0}")]
    StartupTimeout(String),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Unknown {kind} id: {id}")]
    UnknownRegistryId { kind: RegistryKind, id: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("{step}: {source}")]
    StepFailed {
        step: &'static str,
        #[source]
        source: Box<ClawError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClawError {
    pub fn step(step: &'static str, source: ClawError) -> Self {
        ClawError::StepFailed {
            step,
            source: Box::new(source),
        }
    }

    pub fn unknown_plugin(id: impl Into<String>) -> Self {
        ClawError::UnknownRegistryId {
            kind: RegistryKind::Plugin,
            id: id.into(),
        }
    }

    pub fn unknown_skill(id: impl Into<String>) -> Self {
        ClawError::UnknownRegistryId {
            kind: RegistryKind::Skill,
            id: id.into(),
        }
    }

    pub fn unknown_secret(name: impl Into<String>) -> Self {
        ClawError::UnknownRegistryId {
            kind: RegistryKind::Secret,
            id: name.into(),
        }
    }

    /// Kind of the innermost error; step wrappers are looked through
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClawError::Transport(_) => ErrorKind::Transport,
            ClawError::Conflict(_) => ErrorKind::Conflict,
            ClawError::NotFound(_) => ErrorKind::NotFound,
            ClawError::Cloud { .. } => ErrorKind::Cloud,
            ClawError::StartupTimeout(_) => ErrorKind::StartupTimeout,
            ClawError::HealthCheckFailed(_) => ErrorKind::HealthCheckFailed,
            ClawError::InstallFailed(_) => ErrorKind::InstallFailed,
            ClawError::UnknownRegistryId { .. } => ErrorKind::UnknownRegistryId,
            ClawError::ValidationError(_) => ErrorKind::Validation,
            ClawError::StorageError(_) | ClawError::IoError(_) | ClawError::JsonError(_) => {
                ErrorKind::Storage
            }
            ClawError::StepFailed { source, .. } => source.kind(),
            ClawError::ConfigError(_) | ClawError::ServerError(_) | ClawError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Name of the failed provisioning step, if any
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            ClawError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<CloudError> for ClawError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::Transport(msg) => ClawError::Transport(msg),
            CloudError::Conflict(msg) => ClawError::Conflict(msg),
            CloudError::NotFound(msg) => ClawError::NotFound(msg),
            CloudError::Api { status, message } => ClawError::Cloud { status, message },
        }
    }
}

impl From<anyhow::Error> for ClawError {
    fn from(err: anyhow::Error) -> Self {
        ClawError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_reports_inner_kind() {
        let err = ClawError::step("create_vm", ClawError::Transport("timed out".into()));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_transport());
        assert_eq!(err.failed_step(), Some("create_vm"));
        assert_eq!(err.to_string(), "create_vm: Transport error: timed out");
    }

    #[test]
    fn test_cloud_error_conversion() {
        let err: ClawError = CloudError::Api {
            status: 403,
            message: "quota".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Cloud);

        let err: ClawError = CloudError::Conflict("exists".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_unknown_registry_id_display() {
        assert_eq!(
            ClawError::unknown_plugin("nope").to_string(),
            "Unknown plugin id: nope"
        );
    }
}
