//! Google Cloud REST client

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use gcp_api::compute::{
    AttachedDisk, DiskInitializeParams, Firewall, FirewallProtocol, Instance, InstanceInsert,
    Metadata, NetworkInterface, Operation, Router, RouterNat, SerialPortOutput, ServiceAccountRef,
    Tags,
};
use gcp_api::iam::{
    CreateServiceAccountRequest, Policy, Project, ServiceAccount, ServiceAccountFields,
    SetIamPolicyRequest,
};
use gcp_api::secrets::{AddSecretVersionRequest, CreateSecretRequest, SecretPayload};
use gcp_api::ApiErrorBody;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::{
    CloudApi, CloudError, CloudResult, CloudResultExt, ConsoleOutput, CreateOutcome,
    FirewallAction, FirewallRule, InstanceInfo, InstanceRef, InstanceSpec, InstanceStatus,
    RouterSpec, ServiceAccountSpec, OWNER_LABEL,
};
use crate::authn::AccessTokenSource;
use crate::boot::STARTUP_SCRIPT_KEY;
use crate::errors::ClawError;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Base URLs of the APIs the client speaks
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub compute: String,
    pub secret_manager: String,
    pub service_usage: String,
    pub iam: String,
    pub resource_manager: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com/compute/v1".into(),
            secret_manager: "https://secretmanager.googleapis.com/v1".into(),
            service_usage: "https://serviceusage.googleapis.com/v1".into(),
            iam: "https://iam.googleapis.com/v1".into(),
            resource_manager: "https://cloudresourcemanager.googleapis.com/v1".into(),
        }
    }
}

/// Bounds for long-running operation polling
#[derive(Debug, Clone)]
pub struct OperationPolling {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for OperationPolling {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcpOptions {
    pub endpoints: Endpoints,
    pub request_timeout: Duration,
    pub polling: OperationPolling,
}

impl Default for GcpOptions {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            request_timeout: Duration::from_secs(30),
            polling: OperationPolling::default(),
        }
    }
}

/// [`CloudApi`] over the Google REST APIs
pub struct GcpClient {
    client: Client,
    endpoints: Endpoints,
    polling: OperationPolling,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GcpClient {
    pub fn new(tokens: Arc<dyn AccessTokenSource>, options: GcpOptions) -> Result<Self, ClawError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| ClawError::ConfigError(format!("http client: {}", e)))?;

        let trim = |s: &str| s.trim_end_matches('/').to_string();
        let endpoints = Endpoints {
            compute: trim(&options.endpoints.compute),
            secret_manager: trim(&options.endpoints.secret_manager),
            service_usage: trim(&options.endpoints.service_usage),
            iam: trim(&options.endpoints.iam),
            resource_manager: trim(&options.endpoints.resource_manager),
        };

        Ok(Self {
            client,
            endpoints,
            polling: options.polling,
            tokens,
        })
    }

    fn instance_url(&self, target: &InstanceRef) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}",
            self.endpoints.compute, target.project, target.zone, target.name
        )
    }

    fn router_url(&self, project: &str, region: &str) -> String {
        format!(
            "{}/projects/{}/regions/{}/routers",
            self.endpoints.compute, project, region
        )
    }

    async fn bearer(&self) -> CloudResult<SecretString> {
        self.tokens
            .access_token()
            .await
            .map_err(|e| CloudError::Transport(format!("access token: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> CloudResult<T> {
        self.execute("GET", url, self.client.get(url)).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> CloudResult<T> {
        self.execute("POST", url, self.client.post(url).json(body)).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> CloudResult<T> {
        self.execute("PATCH", url, self.client.patch(url).json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, url: &str) -> CloudResult<T> {
        self.execute("DELETE", url, self.client.delete(url)).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        request: RequestBuilder,
    ) -> CloudResult<T> {
        debug!("{} {}", method, url);
        let token = self.bearer().await?;

        let response = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify(status.as_u16(), &body);
            match err {
                CloudError::NotFound(_) | CloudError::Conflict(_) => {
                    debug!("{} {}: {}", method, url, err)
                }
                _ => error!("HTTP {} failed: {} - {}", method, url, err),
            }
            return Err(err);
        }

        response.json::<T>().await.map_err(|e| CloudError::Api {
            status: status.as_u16(),
            message: format!("unreadable response body: {}", e),
        })
    }

    /// Poll an operation until it is done, within the polling bounds
    async fn wait(&self, mut op: Operation) -> CloudResult<()> {
        for _ in 0..self.polling.attempts {
            if op.is_done() {
                return match op.error_message() {
                    Some(message) => Err(CloudError::Api {
                        status: op.http_error_status_code.unwrap_or(400),
                        message,
                    }),
                    None => Ok(()),
                };
            }
            let Some(link) = op.self_link.clone() else {
                return Ok(());
            };
            tokio::time::sleep(self.polling.interval).await;
            op = self.get(&link).await?;
        }
        Err(CloudError::Transport(format!(
            "operation {} still running after {} polls",
            op.name.unwrap_or_default(),
            self.polling.attempts
        )))
    }

    async fn grant_roles(&self, project: &str, members: &[String], roles: &[String]) -> CloudResult<()> {
        let base = format!("{}/projects/{}", self.endpoints.resource_manager, project);
        let mut policy: Policy = self.post(&format!("{}:getIamPolicy", base), &json!({})).await?;

        let mut changed = false;
        for role in roles {
            for member in members {
                changed |= policy.grant(role, member);
            }
        }
        if changed {
            let _: Policy = self
                .post(&format!("{}:setIamPolicy", base), &SetIamPolicyRequest { policy })
                .await?;
            info!(project, roles = roles.len(), "granted IAM roles");
        }
        Ok(())
    }
}

/// Map an HTTP failure onto the retryable / semantic split
pub fn classify(status: u16, body: &str) -> CloudError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.chars().take(200).collect()
            }
        });
    match status {
        401 | 408 | 502 | 503 | 504 => CloudError::Transport(message),
        404 => CloudError::NotFound(message),
        409 => CloudError::Conflict(message),
        status => CloudError::Api { status, message },
    }
}

fn instance_info(instance: Instance) -> InstanceInfo {
    let startup_script = instance
        .metadata
        .as_ref()
        .and_then(|m| m.get(STARTUP_SCRIPT_KEY))
        .map(str::to_string);
    InstanceInfo {
        internal_ip: instance.internal_ip().map(str::to_string),
        status: InstanceStatus::parse(&instance.status),
        name: instance.name,
        creation_timestamp: instance.creation_timestamp,
        last_start_timestamp: instance.last_start_timestamp,
        last_stop_timestamp: instance.last_stop_timestamp,
        startup_script,
        labels: instance.labels,
    }
}

fn console_output(output: SerialPortOutput, start: u64) -> ConsoleOutput {
    let next = output
        .next_offset()
        .unwrap_or(start + output.contents.len() as u64);
    ConsoleOutput {
        contents: output.contents,
        next,
    }
}

fn default_network(project: &str) -> String {
    format!("projects/{}/global/networks/default", project)
}

#[async_trait]
impl CloudApi for GcpClient {
    async fn enable_api(&self, project: &str, service: &str) -> CloudResult<()> {
        let url = format!(
            "{}/projects/{}/services/{}:enable",
            self.endpoints.service_usage, project, service
        );
        let _: Value = self.post(&url, &json!({})).await?;
        info!(project, service, "API enabled");
        Ok(())
    }

    async fn ensure_service_account(
        &self,
        project: &str,
        spec: &ServiceAccountSpec,
    ) -> CloudResult<String> {
        let url = format!("{}/projects/{}/serviceAccounts", self.endpoints.iam, project);
        let body = CreateServiceAccountRequest {
            account_id: spec.account_id.clone(),
            service_account: ServiceAccountFields {
                display_name: spec.display_name.clone(),
            },
        };
        let fallback = format!("{}@{}.iam.gserviceaccount.com", spec.account_id, project);
        let email = match self.post::<ServiceAccount, _>(&url, &body).await {
            Ok(account) if !account.email.is_empty() => {
                info!(project, email = %account.email, "service account created");
                account.email
            }
            Ok(_) | Err(CloudError::Conflict(_)) => fallback,
            Err(e) => return Err(e),
        };

        let mut members = vec![format!("serviceAccount:{}", email)];
        let project_url = format!("{}/projects/{}", self.endpoints.resource_manager, project);
        match self.get::<Project>(&project_url).await {
            Ok(Project {
                project_number: Some(number),
            }) => members.push(format!(
                "serviceAccount:{}-compute@developer.gserviceaccount.com",
                number
            )),
            Ok(_) => {}
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => debug!(project, "project number unavailable: {}", e),
        }

        self.grant_roles(project, &members, &spec.roles).await?;
        Ok(email)
    }

    async fn put_secret(&self, project: &str, name: &str, value: &SecretString) -> CloudResult<()> {
        let base = format!("{}/projects/{}/secrets", self.endpoints.secret_manager, project);
        let created = self
            .execute::<Value>(
                "POST",
                &base,
                self.client
                    .post(&base)
                    .query(&[("secretId", name)])
                    .json(&CreateSecretRequest::automatic()),
            )
            .await
            .map(|_| ())
            .conflict_ok()?;

        let body = AddSecretVersionRequest {
            payload: SecretPayload {
                data: base64::engine::general_purpose::STANDARD.encode(value.expose_secret()),
            },
        };
        let _: Value = self.post(&format!("{}/{}:addVersion", base, name), &body).await?;
        info!(project, secret = name, created, "secret version added");
        Ok(())
    }

    async fn set_firewall_rule(&self, project: &str, rule: &FirewallRule) -> CloudResult<()> {
        let url = format!("{}/projects/{}/global/firewalls", self.endpoints.compute, project);
        let protocol = FirewallProtocol {
            ip_protocol: rule.protocol.clone(),
            ports: rule.ports.clone(),
        };
        let (allowed, denied) = match rule.action {
            FirewallAction::Allow => (vec![protocol], vec![]),
            FirewallAction::Deny => (vec![], vec![protocol]),
        };
        let body = Firewall {
            name: rule.name.clone(),
            direction: "INGRESS".into(),
            priority: rule.priority,
            allowed,
            denied,
            source_ranges: rule.source_ranges.clone(),
            target_tags: rule.target_tags.clone(),
            network: default_network(project),
        };
        let _: Operation = self.post(&url, &body).await?;
        info!(project, rule = %rule.name, "firewall rule created");
        Ok(())
    }

    async fn ensure_router(&self, project: &str, router: &RouterSpec) -> CloudResult<()> {
        let base = self.router_url(project, &router.region);
        let nat = RouterNat {
            name: router.nat_name.clone(),
            nat_ip_allocate_option: "AUTO_ONLY".into(),
            source_subnetwork_ip_ranges_to_nat: "ALL_SUBNETWORKS_ALL_IP_RANGES".into(),
            extra: Default::default(),
        };
        let body = Router {
            name: router.name.clone(),
            network: default_network(project),
            nats: vec![nat.clone()],
            extra: Default::default(),
        };

        match self.post::<Operation, _>(&base, &body).await {
            Ok(op) => {
                self.wait(op).await?;
                info!(project, router = %router.name, "router created");
                return Ok(());
            }
            Err(CloudError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }

        let url = format!("{}/{}", base, router.name);
        let mut existing: Router = self.get(&url).await?;
        if existing.nats.iter().any(|n| n.name == router.nat_name) {
            return Ok(());
        }
        existing.nats.push(nat);
        let op: Operation = self.patch(&url, &existing).await?;
        self.wait(op).await?;
        info!(project, router = %router.name, nat = %router.nat_name, "NAT added to router");
        Ok(())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> CloudResult<CreateOutcome> {
        let target = &spec.target;
        let url = format!(
            "{}/projects/{}/zones/{}/instances",
            self.endpoints.compute, target.project, target.zone
        );
        let mut metadata = Metadata::default();
        metadata.upsert(STARTUP_SCRIPT_KEY, &spec.startup_script);
        let body = InstanceInsert {
            name: target.name.clone(),
            machine_type: format!("zones/{}/machineTypes/{}", target.zone, spec.machine_type),
            disks: vec![AttachedDisk {
                boot: true,
                auto_delete: true,
                initialize_params: DiskInitializeParams {
                    source_image: spec.source_image.clone(),
                },
            }],
            network_interfaces: vec![NetworkInterface {
                network: Some(default_network(&target.project)),
                network_ip: None,
            }],
            service_accounts: vec![ServiceAccountRef {
                email: spec.service_account_email.clone(),
                scopes: vec![CLOUD_PLATFORM_SCOPE.to_string()],
            }],
            tags: Tags {
                items: vec![spec.network_tag.clone()],
            },
            metadata,
            labels: BTreeMap::from([(OWNER_LABEL.to_string(), target.owner_label())]),
        };

        match self.post::<Operation, _>(&url, &body).await {
            Ok(op) => {
                self.wait(op).await?;
                info!(instance = %target, "instance created");
                Ok(CreateOutcome::Created)
            }
            Err(CloudError::Conflict(_)) => {
                info!(instance = %target, "instance already exists");
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_instance(&self, target: &InstanceRef) -> CloudResult<Option<InstanceInfo>> {
        match self.get::<Instance>(&self.instance_url(target)).await {
            Ok(instance) => Ok(Some(instance_info(instance))),
            Err(CloudError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn start_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let _: Operation = self
            .post(&format!("{}/start", self.instance_url(target)), &json!({}))
            .await?;
        info!(instance = %target, "start requested");
        Ok(())
    }

    async fn stop_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let _: Operation = self
            .post(&format!("{}/stop", self.instance_url(target)), &json!({}))
            .await?;
        info!(instance = %target, "stop requested");
        Ok(())
    }

    async fn reset_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let _: Operation = self
            .post(&format!("{}/reset", self.instance_url(target)), &json!({}))
            .await?;
        info!(instance = %target, "reset requested");
        Ok(())
    }

    async fn set_instance_metadata(
        &self,
        target: &InstanceRef,
        key: &str,
        value: &str,
    ) -> CloudResult<()> {
        let url = self.instance_url(target);
        let instance: Instance = self.get(&url).await?;
        let mut metadata = instance.metadata.unwrap_or_default();
        metadata.upsert(key, value);

        let op: Operation = self.post(&format!("{}/setMetadata", url), &metadata).await?;
        self.wait(op).await?;
        info!(instance = %target, key, "metadata updated");
        Ok(())
    }

    async fn delete_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        match self.delete::<Operation>(&self.instance_url(target)).await {
            Ok(_) => {
                info!(instance = %target, "instance deletion requested");
                Ok(())
            }
            Err(CloudError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_router(&self, project: &str, region: &str, name: &str) -> CloudResult<()> {
        let url = format!("{}/{}", self.router_url(project, region), name);
        match self.delete::<Operation>(&url).await {
            Ok(_) => {
                info!(project, router = name, "router deletion requested");
                Ok(())
            }
            Err(CloudError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_serial_port_output(
        &self,
        target: &InstanceRef,
        start: u64,
    ) -> CloudResult<ConsoleOutput> {
        let url = format!(
            "{}/serialPort?port=1&start={}",
            self.instance_url(target),
            start
        );
        let output: SerialPortOutput = self.get(&url).await?;
        Ok(console_output(output, start))
    }
}
