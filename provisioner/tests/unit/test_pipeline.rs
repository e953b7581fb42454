//! Provisioning pipeline tests

use std::collections::BTreeSet;

use clawctl::boot::{fingerprint_of, STARTUP_SCRIPT_KEY};
use clawctl::cloud::memory::BootBehaviour;
use clawctl::cloud::{CloudError, MemoryCloud};
use clawctl::deploy::StepOutcome;
use clawctl::errors::ErrorKind;
use clawctl::models::DeploymentStatus;
use clawctl::store::DeploymentStore;
use tokio_test::{assert_err, assert_ok};

use crate::common::{request, Harness};

#[tokio::test]
async fn test_repeated_deploy_converges_on_one_of_everything() {
    let h = Harness::new();
    let first = assert_ok!(h.state.pipeline.deploy(&request()).await);
    let second = assert_ok!(h.state.pipeline.deploy(&request()).await);

    assert_eq!(first.deployment_id, second.deployment_id);
    assert_eq!(h.cloud.instance_count(), 1);
    assert_eq!(h.cloud.service_account_count(), 1);
    assert_eq!(h.cloud.router_count(), 1);

    let rules = h.cloud.firewall_rules();
    let names: BTreeSet<&str> = rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(rules.len(), 2);
    assert_eq!(names.len(), 2);

    let records = h.store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeploymentStatus::Running);
}

#[tokio::test]
async fn test_concurrent_deploys_for_one_vm_are_serialized() {
    let h = Harness::new();
    let req = request();
    let (a, b) = tokio::join!(h.state.pipeline.deploy(&req), h.state.pipeline.deploy(&req));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.deployment_id, b.deployment_id);
    assert_eq!(h.cloud.instance_count(), 1);
    assert_eq!(h.cloud.boot_count(&req.instance_ref()), 1);
    assert_eq!(h.store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_payload_is_deterministic() {
    let one = Harness::new();
    let two = Harness::new();
    let req = request();

    let a = one.state.pipeline.preflight(&req).unwrap();
    let b = two.state.pipeline.preflight(&req).unwrap();
    assert_eq!(a.script, b.script);
    assert_eq!(a.fingerprint, b.fingerprint);

    let report = one.state.pipeline.deploy(&req).await.unwrap();
    assert_eq!(report.payload_fingerprint, a.fingerprint);
    let script = one
        .cloud
        .instance_metadata(&req.instance_ref(), STARTUP_SCRIPT_KEY)
        .unwrap();
    assert_eq!(fingerprint_of(&script), a.fingerprint);
}

#[tokio::test]
async fn test_unknown_plugin_makes_no_cloud_calls() {
    let h = Harness::new();
    let mut req = request();
    req.enabled_plugins.insert("not-a-plugin".into());

    let err = assert_err!(h.state.pipeline.deploy(&req).await);
    assert_eq!(err.kind(), ErrorKind::UnknownRegistryId);
    assert_eq!(h.cloud.call_count(), 0);
    assert!(h.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_skill_is_rejected() {
    let h = Harness::new();
    let mut req = request();
    req.enabled_skills.insert("juggling".into());

    let err = assert_err!(h.state.pipeline.deploy(&req).await);
    assert_eq!(err.kind(), ErrorKind::UnknownRegistryId);
    assert_eq!(h.cloud.call_count(), 0);
}

#[tokio::test]
async fn test_startup_timeout_keeps_vm_and_marks_record() {
    let h = Harness::with_cloud(MemoryCloud::with_boot(BootBehaviour::Hang));
    let req = request();

    let err = assert_err!(h.state.pipeline.deploy(&req).await);
    assert_eq!(err.kind(), ErrorKind::StartupTimeout);
    assert_eq!(err.failed_step(), Some("wait_for_startup"));
    assert_eq!(h.cloud.instance_count(), 1);

    let record = h.store.list().await.unwrap().remove(0);
    assert_eq!(record.status, DeploymentStatus::Error);
    assert!(record
        .error
        .as_deref()
        .unwrap()
        .starts_with("wait_for_startup"));
}

#[tokio::test]
async fn test_rerun_after_timeout_recovers() {
    let h = Harness::with_cloud(MemoryCloud::with_boot(BootBehaviour::Hang));
    let req = request();
    assert_err!(h.state.pipeline.deploy(&req).await);

    // the VM finishes booting on its own, then the same request is replayed
    h.cloud.set_boot_behaviour(BootBehaviour::Healthy);
    h.cloud.set_instance_status(
        &req.instance_ref(),
        clawctl::cloud::InstanceStatus::Terminated,
    );
    let report = assert_ok!(h.state.pipeline.deploy(&req).await);

    let record = h.store.get(&report.deployment_id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert!(record.error.is_none());
    assert_eq!(h.store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unhealthy_agent_fails_verify_health() {
    let h = Harness::with_cloud(MemoryCloud::with_boot(BootBehaviour::Unhealthy));
    let err = assert_err!(h.state.pipeline.deploy(&request()).await);
    assert_eq!(err.kind(), ErrorKind::HealthCheckFailed);
    assert_eq!(err.failed_step(), Some("verify_health"));

    let record = h.store.list().await.unwrap().remove(0);
    assert_eq!(record.status, DeploymentStatus::Error);
}

#[tokio::test]
async fn test_transport_failure_leaves_status_alone() {
    let h = Harness::new();
    let req = request();
    let report = h.state.pipeline.deploy(&req).await.unwrap();

    h.cloud
        .fail_next("enable_api", CloudError::Transport("connection reset".into()));
    let err = assert_err!(h.state.pipeline.deploy(&req).await);
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.failed_step(), Some("enable_apis"));

    let record = h.store.get(&report.deployment_id).await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_missing_secrets_are_reported_not_fatal() {
    let h = Harness::new();
    let report = h.state.pipeline.deploy(&request()).await.unwrap();

    let missing: Vec<&str> = report
        .missing_secrets
        .iter()
        .map(|m| m.secret_name.as_str())
        .collect();
    assert_eq!(missing, ["postiz-url", "postiz-api-key"]);
    assert!(report
        .steps
        .iter()
        .all(|s| s.outcome != StepOutcome::Failed));
}

#[tokio::test]
async fn test_skill_dependency_gap_is_a_warning() {
    let h = Harness::new();
    let mut req = request();
    req.enabled_skills.insert("daily-posts".into());

    let report = h.state.pipeline.deploy(&req).await.unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("daily-posts") && w.contains("convex-knowledge")));
}

#[tokio::test]
async fn test_secrets_are_written_once_per_run() {
    let h = Harness::new();
    let req = request();
    h.state.pipeline.deploy(&req).await.unwrap();
    h.state.pipeline.deploy(&req).await.unwrap();

    assert_eq!(h.cloud.secret_versions("acme-agents", "telegram-bot-token"), 2);
    let record = h.store.list().await.unwrap().remove(0);
    let refs = h.store.secret_refs(&record.id).await.unwrap();
    assert_eq!(refs.len(), 1);
}
