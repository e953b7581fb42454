//! Lifecycle controller tests

use std::time::Duration;

use clawctl::boot::{fingerprint_of, STARTUP_SCRIPT_KEY};
use clawctl::cloud::{CloudError, InstanceStatus};
use clawctl::errors::ErrorKind;
use clawctl::lifecycle::ConfigChanges;
use clawctl::models::{Branding, DeploymentStatus};
use clawctl::store::DeploymentStore;
use control_api::VmAction;
use secrecy::SecretString;
use tokio_test::{assert_err, assert_ok};

use crate::common::{request, Harness};

async fn deployed() -> (Harness, String) {
    let h = Harness::new();
    let report = h.state.pipeline.deploy(&request()).await.unwrap();
    (h, report.deployment_id)
}

fn api_error(message: &str) -> CloudError {
    CloudError::Api {
        status: 403,
        message: message.into(),
    }
}

#[tokio::test]
async fn test_stop_then_start() {
    let (h, id) = deployed().await;
    let target = request().instance_ref();

    let record = assert_ok!(h.state.lifecycle.power(&id, VmAction::Stop).await);
    assert_eq!(record.status, DeploymentStatus::Stopped);
    assert_eq!(h.cloud.instance_status(&target), Some(InstanceStatus::Terminated));

    let record = assert_ok!(h.state.lifecycle.power(&id, VmAction::Start).await);
    assert_eq!(record.status, DeploymentStatus::Running);
    assert_eq!(h.cloud.boot_count(&target), 2);
}

#[tokio::test]
async fn test_failed_stop_leaves_status() {
    let (h, id) = deployed().await;
    h.cloud
        .fail_next("stop_instance", CloudError::Transport("timed out".into()));

    let err = assert_err!(h.state.lifecycle.stop(&id).await);
    assert_eq!(err.kind(), ErrorKind::Transport);
    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let h = Harness::new();
    let err = assert_err!(h.state.lifecycle.start("missing").await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.cloud.call_count(), 0);
}

#[tokio::test]
async fn test_update_keeps_identity_and_reboots() {
    let (h, id) = deployed().await;
    let target = request().instance_ref();

    let changes = ConfigChanges {
        branding: Some(Branding {
            bot_name: "Dyno Two".into(),
            personality: "terse".into(),
            system_prompt: None,
        }),
        ..Default::default()
    };
    let payload = assert_ok!(h.state.lifecycle.update(&id, changes).await);

    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.project_id, "acme-agents");
    assert_eq!(record.zone, "us-central1-a");
    assert_eq!(record.vm_name, "claw");
    assert_eq!(record.branding.bot_name, "Dyno Two");
    assert_eq!(record.status, DeploymentStatus::Running);

    assert_eq!(h.cloud.instance_count(), 1);
    assert_eq!(h.cloud.boot_count(&target), 2);
    let script = h
        .cloud
        .instance_metadata(&target, STARTUP_SCRIPT_KEY)
        .unwrap();
    assert_eq!(fingerprint_of(&script), payload.fingerprint);
}

#[tokio::test]
async fn test_update_of_stopped_vm_starts_it() {
    let (h, id) = deployed().await;
    h.state.lifecycle.stop(&id).await.unwrap();

    let changes = ConfigChanges {
        plugins: Some(Default::default()),
        ..Default::default()
    };
    h.state.lifecycle.update(&id, changes).await.unwrap();

    assert_eq!(h.cloud.calls_to("reset_instance"), 0);
    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    let plugins = h.store.plugin_configs(&id).await.unwrap();
    assert!(plugins.iter().all(|p| !p.enabled));
}

#[tokio::test]
async fn test_update_with_unknown_plugin_changes_nothing() {
    let (h, id) = deployed().await;
    let calls = h.cloud.call_count();

    let changes = ConfigChanges {
        plugins: Some(["nope".to_string()].into_iter().collect()),
        ..Default::default()
    };
    let err = assert_err!(h.state.lifecycle.update(&id, changes).await);
    assert_eq!(err.kind(), ErrorKind::UnknownRegistryId);
    assert_eq!(h.cloud.call_count(), calls);
    let plugins = h.store.plugin_configs(&id).await.unwrap();
    assert!(plugins.iter().any(|p| p.plugin_id == "postiz" && p.enabled));
}

#[tokio::test]
async fn test_failed_metadata_push_keeps_stored_config() {
    let (h, id) = deployed().await;
    let target = request().instance_ref();
    let deployed_script = h.cloud.instance_metadata(&target, STARTUP_SCRIPT_KEY);
    h.cloud.fail_next(
        "set_instance_metadata",
        CloudError::Transport("connection reset".into()),
    );

    let changes = ConfigChanges {
        branding: Some(Branding {
            bot_name: "Dyno Two".into(),
            personality: "terse".into(),
            system_prompt: None,
        }),
        plugins: Some(Default::default()),
        ..Default::default()
    };
    let err = assert_err!(h.state.lifecycle.update(&id, changes).await);
    assert_eq!(err.kind(), ErrorKind::Transport);

    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.branding.bot_name, "Dyno");
    assert_eq!(record.status, DeploymentStatus::Running);
    let plugins = h.store.plugin_configs(&id).await.unwrap();
    assert!(plugins.iter().any(|p| p.plugin_id == "postiz" && p.enabled));
    assert_eq!(h.cloud.instance_metadata(&target, STARTUP_SCRIPT_KEY), deployed_script);
    assert_eq!(h.cloud.boot_count(&target), 1);
}

#[tokio::test]
async fn test_delete_collects_warnings() {
    let cases: [(Option<&str>, Option<&str>, &[&str]); 4] = [
        (None, None, &[]),
        (Some("delete_instance"), None, &["instance: "]),
        (None, Some("delete_router"), &["router: "]),
        (
            Some("delete_instance"),
            Some("delete_router"),
            &["instance: ", "router: "],
        ),
    ];

    for (instance_fail, router_fail, expected) in cases {
        let (h, id) = deployed().await;
        for op in [instance_fail, router_fail].into_iter().flatten() {
            h.cloud.fail_next(op, api_error("denied"));
        }

        let outcome = assert_ok!(h.state.lifecycle.delete(&id, false).await);
        assert_eq!(outcome.warnings.len(), expected.len());
        for (warning, prefix) in outcome.warnings.iter().zip(expected.iter()) {
            assert!(warning.starts_with(prefix), "{}", warning);
        }

        let record = h.state.lifecycle.get(&id).await.unwrap();
        assert_eq!(record.status, DeploymentStatus::Deleted);
    }
}

#[tokio::test]
async fn test_purge_removes_record() {
    let (h, id) = deployed().await;
    h.state.lifecycle.delete(&id, true).await.unwrap();

    assert!(h.store.get(&id).await.unwrap().is_none());
    assert!(h.store.plugin_configs(&id).await.unwrap().is_empty());
    assert_eq!(h.cloud.instance_count(), 0);
    assert_eq!(h.cloud.router_count(), 0);
}

#[tokio::test]
async fn test_shared_router_survives_delete() {
    let (h, id) = deployed().await;
    let mut other = request();
    other.vm_name = "claw-two".into();
    h.state.pipeline.deploy(&other).await.unwrap();

    h.state.lifecycle.delete(&id, false).await.unwrap();
    assert_eq!(h.cloud.calls_to("delete_router"), 0);
    assert_eq!(h.cloud.router_count(), 1);
}

#[tokio::test]
async fn test_deleted_deployment_rejects_power_actions() {
    let (h, id) = deployed().await;
    h.state.lifecycle.delete(&id, false).await.unwrap();

    let err = assert_err!(h.state.lifecycle.start(&id).await);
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_status_reconciles_out_of_band_stop() {
    let (h, id) = deployed().await;
    h.cloud
        .set_instance_status(&request().instance_ref(), InstanceStatus::Terminated);

    let live = h.state.lifecycle.status(&id).await.unwrap();
    assert_eq!(live.status, InstanceStatus::Terminated);
    assert_eq!(live.internal_ip.as_deref(), Some("10.128.0.2"));
    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Stopped);
}

#[tokio::test]
async fn test_status_answers_while_vm_is_busy() {
    let (h, id) = deployed().await;
    let target = request().instance_ref();
    h.cloud.set_instance_status(&target, InstanceStatus::Terminated);

    let guard = h.state.locks.lock(&target.key()).await;
    let live = tokio::time::timeout(Duration::from_secs(1), h.state.lifecycle.status(&id))
        .await
        .expect("status blocked behind the VM lock")
        .unwrap();
    assert_eq!(live.status, InstanceStatus::Terminated);
    // the holder owns the record until it lets go
    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);

    drop(guard);
    h.state.lifecycle.status(&id).await.unwrap();
    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Stopped);
}

#[tokio::test]
async fn test_status_of_vanished_instance() {
    let (h, id) = deployed().await;
    h.cloud.remove_instance(&request().instance_ref());

    let live = h.state.lifecycle.status(&id).await.unwrap();
    assert_eq!(live.status, InstanceStatus::NotFound);
    let record = h.state.lifecycle.get(&id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
}

#[tokio::test]
async fn test_logs_return_console() {
    let (h, id) = deployed().await;
    let output = h.state.lifecycle.logs(&id).await.unwrap();
    assert!(output.contains("plugin installed: postiz"));
}

#[tokio::test]
async fn test_secrets_fill_missing_configuration() {
    let (h, id) = deployed().await;
    let missing = h.state.lifecycle.missing_configuration(&id).await.unwrap();
    assert_eq!(missing.len(), 2);

    let value = SecretString::from("https://postiz.example.com".to_string());
    h.state
        .lifecycle
        .create_secret(&id, "postiz-url", &value)
        .await
        .unwrap();
    assert_eq!(h.cloud.secret_versions("acme-agents", "postiz-url"), 1);

    let missing = h.state.lifecycle.missing_configuration(&id).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].secret_name, "postiz-api-key");
}

#[tokio::test]
async fn test_unknown_secret_slot_is_rejected() {
    let (h, id) = deployed().await;
    let value = SecretString::from("x".to_string());
    let err = assert_err!(h.state.lifecycle.create_secret(&id, "root-password", &value).await);
    assert_eq!(err.kind(), ErrorKind::UnknownRegistryId);
}
