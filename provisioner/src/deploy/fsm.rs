//! Finite state machine for deployment record status

use crate::cloud::InstanceStatus;
use crate::errors::ClawError;
use crate::models::{DeploymentRecord, DeploymentStatus};
use crate::store::RecordPatch;

/// Something that happened to a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A provisioning run took ownership of the record
    ProvisionStarted,

    /// Every provisioning step succeeded
    ProvisionSucceeded,

    /// A provisioning step failed with a non-transport error
    ProvisionFailed(String),

    /// The provider confirmed a start
    Started,

    /// The provider confirmed a stop
    Stopped,

    /// The provider confirmed a reset
    Reset,

    /// A new boot payload was pushed and the VM rebooted
    Updated,

    /// A live status read
    Observed(InstanceStatus),

    /// Torn down
    Deleted,
}

/// Record status FSM
#[derive(Debug, Clone)]
pub struct StatusFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl StatusFsm {
    pub fn new(status: DeploymentStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            status: record.status,
            error: record.error.clone(),
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: StatusEvent) -> Result<(), ClawError> {
        use DeploymentStatus::*;

        let (status, error) = match (self.status, &event) {
            // Deleted is terminal
            (Deleted, StatusEvent::Deleted) => (Deleted, self.error.clone()),
            (Deleted, event) => {
                return Err(ClawError::ValidationError(format!(
                    "deployment is deleted, cannot apply {:?}",
                    event
                )));
            }
            (_, StatusEvent::Deleted) => (Deleted, None),

            (_, StatusEvent::ProvisionStarted) => (Provisioning, None),
            (Provisioning, StatusEvent::ProvisionSucceeded) => (Running, None),
            (_, StatusEvent::ProvisionFailed(err)) => (Error, Some(err.clone())),

            (_, StatusEvent::Started) | (_, StatusEvent::Reset) => (Running, None),
            (_, StatusEvent::Stopped) => (Stopped, None),

            (Running | Stopped | Error, StatusEvent::Updated) => (Running, None),

            // Only settled states follow the provider; provisioning and error
            // belong to the pipeline
            (Running | Stopped, StatusEvent::Observed(observed)) => {
                match DeploymentStatus::from_observed(observed) {
                    Some(status) => (status, None),
                    None => (self.status, self.error.clone()),
                }
            }
            (_, StatusEvent::Observed(_)) => (self.status, self.error.clone()),

            (state, event) => {
                return Err(ClawError::ValidationError(format!(
                    "invalid transition: {} -> {:?}",
                    state, event
                )));
            }
        };

        self.status = status;
        self.error = error;
        Ok(())
    }

    /// Store patch that persists the current state
    pub fn patch(&self) -> RecordPatch {
        RecordPatch {
            status: Some(self.status),
            error: Some(self.error.clone()),
            ..Default::default()
        }
    }
}
