//! Provisioning steps and their reports

use control_api::StepBody;
use serde::Serialize;

use crate::errors::ClawError;

/// One provisioning step. [`Step::ORDER`] is the order every run follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    EnableApis,
    EnsureServiceAccount,
    StoreSecrets,
    ConfigureFirewall,
    WriteStartupScript,
    CreateVm,
    WaitForStartup,
    InstallPlugins,
    ConfigurePlugins,
    InstallSkills,
    VerifyHealth,
}

impl Step {
    pub const ORDER: [Step; 11] = [
        Step::EnableApis,
        Step::EnsureServiceAccount,
        Step::StoreSecrets,
        Step::ConfigureFirewall,
        Step::WriteStartupScript,
        Step::CreateVm,
        Step::WaitForStartup,
        Step::InstallPlugins,
        Step::ConfigurePlugins,
        Step::InstallSkills,
        Step::VerifyHealth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::EnableApis => "enable_apis",
            Step::EnsureServiceAccount => "ensure_service_account",
            Step::StoreSecrets => "store_secrets",
            Step::ConfigureFirewall => "configure_firewall",
            Step::WriteStartupScript => "write_startup_script",
            Step::CreateVm => "create_vm",
            Step::WaitForStartup => "wait_for_startup",
            Step::InstallPlugins => "install_plugins",
            Step::ConfigurePlugins => "configure_plugins",
            Step::InstallSkills => "install_skills",
            Step::VerifyHealth => "verify_health",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    /// Nothing to do, or the resource already existed
    Skipped,
    Failed,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Ok => "ok",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: &'static str,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    pub fn new(step: Step, outcome: StepOutcome) -> Self {
        Self {
            name: step.name(),
            outcome,
            error: None,
        }
    }

    pub fn failed(step: Step, err: &ClawError) -> Self {
        Self {
            name: step.name(),
            outcome: StepOutcome::Failed,
            error: Some(err.to_string()),
        }
    }
}

impl From<&StepReport> for StepBody {
    fn from(report: &StepReport) -> Self {
        StepBody {
            name: report.name.to_string(),
            outcome: report.outcome.as_str().to_string(),
            error: report.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_fixed() {
        let names: Vec<&str> = Step::ORDER.iter().map(Step::name).collect();
        assert_eq!(
            names,
            [
                "enable_apis",
                "ensure_service_account",
                "store_secrets",
                "configure_firewall",
                "write_startup_script",
                "create_vm",
                "wait_for_startup",
                "install_plugins",
                "configure_plugins",
                "install_skills",
                "verify_health",
            ]
        );
    }

    #[test]
    fn test_failed_report_body() {
        let report = StepReport::failed(
            Step::CreateVm,
            &ClawError::Cloud {
                status: 403,
                message: "quota".into(),
            },
        );
        let body = StepBody::from(&report);
        assert_eq!(body.name, "create_vm");
        assert_eq!(body.outcome, "failed");
        assert_eq!(body.error.as_deref(), Some("Cloud API error (403): quota"));
    }
}
