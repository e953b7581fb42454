//! Agent health probing

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::boot::markers;
use crate::cloud::{CloudApi, InstanceRef, InstanceStatus};
use crate::errors::ClawError;

/// One health check of a deployed agent.
///
/// `Ok(())` means healthy. [`ClawError::HealthCheckFailed`] and transport
/// errors count as a failed attempt; anything else aborts the check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, target: &InstanceRef) -> Result<(), ClawError>;
}

/// Healthy when the instance is RUNNING and the latest health line the
/// boot payload printed reads `active`
pub struct ConsoleHealthProbe {
    cloud: Arc<dyn CloudApi>,
}

impl ConsoleHealthProbe {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl HealthProbe for ConsoleHealthProbe {
    async fn check(&self, target: &InstanceRef) -> Result<(), ClawError> {
        let status = self
            .cloud
            .get_instance(target)
            .await?
            .map(|info| info.status)
            .unwrap_or(InstanceStatus::NotFound);
        if status != InstanceStatus::Running {
            return Err(ClawError::HealthCheckFailed(format!(
                "instance is {}",
                status
            )));
        }

        // start 0 yields the retained tail, which holds the latest report
        let console = self.cloud.get_serial_port_output(target, 0).await?;
        match markers::last_health(&console.contents) {
            Some("active") => Ok(()),
            Some(state) => {
                debug!("{} agent service is {}", target, state);
                Err(ClawError::HealthCheckFailed(format!(
                    "agent service is {}",
                    state
                )))
            }
            None => Err(ClawError::HealthCheckFailed(
                "no health report on the serial console".into(),
            )),
        }
    }
}

/// Whether a probe error is worth another attempt
pub(crate) fn is_retryable(err: &ClawError) -> bool {
    matches!(
        err.kind(),
        crate::errors::ErrorKind::HealthCheckFailed | crate::errors::ErrorKind::Transport
    )
}
