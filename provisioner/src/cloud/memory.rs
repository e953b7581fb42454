//! In-memory cloud
//!
//! Keeps resources in maps and simulates what a VM prints on its serial
//! console when it runs a boot payload. Used by tests and `--dry-run`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use secrecy::SecretString;

use super::{
    CloudApi, CloudError, CloudResult, ConsoleOutput, CreateOutcome, FirewallRule, InstanceInfo,
    InstanceRef, InstanceSpec, InstanceStatus, RouterSpec, ServiceAccountSpec, OWNER_LABEL,
};
use crate::boot::{markers, STARTUP_SCRIPT_KEY};

/// How a simulated VM reacts to its boot payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BootBehaviour {
    /// Every install succeeds and the service is active
    #[default]
    Healthy,
    /// Nothing is printed; the boot never completes
    Hang,
    /// The payload completes but the service is not active
    Unhealthy,
    /// The named plugin fails to install
    PluginFailure(String),
}

#[derive(Debug, Clone)]
struct MemoryInstance {
    status: InstanceStatus,
    metadata: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    /// Retained tail of the serial console
    console: String,
    /// Absolute position of the first retained console byte
    console_base: u64,
    boots: u32,
}

impl MemoryInstance {
    fn new(startup_script: &str) -> Self {
        Self {
            status: InstanceStatus::Provisioning,
            metadata: BTreeMap::from([(
                STARTUP_SCRIPT_KEY.to_string(),
                startup_script.to_string(),
            )]),
            labels: BTreeMap::new(),
            console: String::new(),
            console_base: 0,
            boots: 0,
        }
    }

    /// Drop console bytes older than the last `window` bytes
    fn trim_console(&mut self, window: Option<usize>) {
        let Some(window) = window else { return };
        if self.console.len() <= window {
            return;
        }
        let mut cut = self.console.len() - window;
        while !self.console.is_char_boundary(cut) {
            cut += 1;
        }
        self.console.drain(..cut);
        self.console_base += cut as u64;
    }

    fn console_from(&self, start: u64) -> ConsoleOutput {
        let next = self.console_base + self.console.len() as u64;
        let from = start.clamp(self.console_base, next) - self.console_base;
        ConsoleOutput {
            contents: self
                .console
                .get(from as usize..)
                .unwrap_or_default()
                .to_string(),
            next,
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<CloudError>>,
    persistent_failures: HashMap<&'static str, CloudError>,
    boot: BootBehaviour,
    console_window: Option<usize>,
    apis: BTreeSet<(String, String)>,
    service_accounts: BTreeMap<String, BTreeSet<String>>,
    secrets: BTreeMap<(String, String), usize>,
    firewalls: BTreeMap<(String, String), FirewallRule>,
    routers: BTreeMap<(String, String, String), RouterSpec>,
    instances: BTreeMap<InstanceRef, MemoryInstance>,
}

impl State {
    /// Record the call and return its scripted failure, if any
    fn enter(&mut self, op: &'static str) -> CloudResult<()> {
        self.calls.push(op);
        if let Some(err) = self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = self.persistent_failures.get(op) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn instance(&mut self, target: &InstanceRef) -> CloudResult<&mut MemoryInstance> {
        self.instances
            .get_mut(target)
            .ok_or_else(|| CloudError::NotFound(format!("instance {}", target)))
    }
}

#[derive(Default)]
pub struct MemoryCloud {
    state: Mutex<State>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boot(boot: BootBehaviour) -> Self {
        let cloud = Self::default();
        cloud.lock().boot = boot;
        cloud
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_boot_behaviour(&self, boot: BootBehaviour) {
        self.lock().boot = boot;
    }

    /// Fail the next call of `op` with `err`; queued failures fire in order
    pub fn fail_next(&self, op: &'static str, err: CloudError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Fail every call of `op` until cleared
    pub fn fail_always(&self, op: &'static str, err: CloudError) {
        self.lock().persistent_failures.insert(op, err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failures.clear();
        state.persistent_failures.clear();
    }

    /// Total number of calls made
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Number of calls made to `op`
    pub fn calls_to(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn service_account_count(&self) -> usize {
        self.lock().service_accounts.len()
    }

    pub fn firewall_rules(&self) -> Vec<FirewallRule> {
        self.lock().firewalls.values().cloned().collect()
    }

    pub fn router_count(&self) -> usize {
        self.lock().routers.len()
    }

    pub fn secret_versions(&self, project: &str, name: &str) -> usize {
        self.lock()
            .secrets
            .get(&(project.to_string(), name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn instance_status(&self, target: &InstanceRef) -> Option<InstanceStatus> {
        self.lock().instances.get(target).map(|i| i.status.clone())
    }

    pub fn instance_metadata(&self, target: &InstanceRef, key: &str) -> Option<String> {
        self.lock()
            .instances
            .get(target)
            .and_then(|i| i.metadata.get(key).cloned())
    }

    /// How many times the instance has run its boot payload
    pub fn boot_count(&self, target: &InstanceRef) -> u32 {
        self.lock().instances.get(target).map(|i| i.boots).unwrap_or(0)
    }

    /// Change an instance's status behind the orchestrator's back
    pub fn set_instance_status(&self, target: &InstanceRef, status: InstanceStatus) {
        if let Some(instance) = self.lock().instances.get_mut(target) {
            instance.status = status;
        }
    }

    /// Keep only the last `bytes` of each serial console, as the provider does
    pub fn set_console_window(&self, bytes: usize) {
        self.lock().console_window = Some(bytes);
    }

    /// Place a booted instance that the orchestrator did not create
    pub fn insert_unmanaged_instance(&self, target: &InstanceRef, startup_script: &str) {
        let mut state = self.lock();
        let mut instance = MemoryInstance::new(startup_script);
        instance.labels.insert("team".into(), "databases".into());
        let (behaviour, window) = (state.boot.clone(), state.console_window);
        boot(&mut instance, &behaviour, window);
        state.instances.insert(target.clone(), instance);
    }

    /// Remove an instance behind the orchestrator's back
    pub fn remove_instance(&self, target: &InstanceRef) {
        self.lock().instances.remove(target);
    }
}

/// Console output of one run of `script`
fn simulate_boot(script: &str, boot: &BootBehaviour) -> String {
    if *boot == BootBehaviour::Hang {
        return String::new();
    }
    let line = |text: &str| format!("startup-script: {}{}\n", markers::PREFIX, text);

    let mut out = line("Installing plugins...");
    for id in script.lines().filter_map(|l| l.strip_prefix("install_plugin ")) {
        match boot {
            BootBehaviour::PluginFailure(failed) if failed == id => {
                out.push_str(&line(&format!("plugin install failed: {}", id)))
            }
            _ => out.push_str(&line(&format!("plugin installed: {}", id))),
        }
    }
    for entry in script.lines().filter_map(|l| l.strip_prefix("install_skill ")) {
        let id = entry.split_whitespace().next().unwrap_or(entry);
        out.push_str(&line(&format!("skill installed: {}", id)));
    }
    let health = if *boot == BootBehaviour::Unhealthy {
        "failed"
    } else {
        "active"
    };
    out.push_str(&line(&format!("agent health: {}", health)));
    out.push_str(&line(markers::BOOT_COMPLETE));
    out
}

fn boot(instance: &mut MemoryInstance, behaviour: &BootBehaviour, window: Option<usize>) {
    let script = instance
        .metadata
        .get(STARTUP_SCRIPT_KEY)
        .cloned()
        .unwrap_or_default();
    instance.status = InstanceStatus::Running;
    instance.boots += 1;
    instance.console.push_str(&simulate_boot(&script, behaviour));
    instance.trim_console(window);
}

#[async_trait]
impl CloudApi for MemoryCloud {
    async fn enable_api(&self, project: &str, service: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("enable_api")?;
        state.apis.insert((project.to_string(), service.to_string()));
        Ok(())
    }

    async fn ensure_service_account(
        &self,
        project: &str,
        spec: &ServiceAccountSpec,
    ) -> CloudResult<String> {
        let mut state = self.lock();
        state.enter("ensure_service_account")?;
        let email = format!("{}@{}.iam.gserviceaccount.com", spec.account_id, project);
        state
            .service_accounts
            .entry(email.clone())
            .or_default()
            .extend(spec.roles.iter().cloned());
        Ok(email)
    }

    async fn put_secret(&self, project: &str, name: &str, _value: &SecretString) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("put_secret")?;
        *state
            .secrets
            .entry((project.to_string(), name.to_string()))
            .or_default() += 1;
        Ok(())
    }

    async fn set_firewall_rule(&self, project: &str, rule: &FirewallRule) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("set_firewall_rule")?;
        let key = (project.to_string(), rule.name.clone());
        if state.firewalls.contains_key(&key) {
            return Err(CloudError::Conflict(format!("firewall {}", rule.name)));
        }
        state.firewalls.insert(key, rule.clone());
        Ok(())
    }

    async fn ensure_router(&self, project: &str, router: &RouterSpec) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("ensure_router")?;
        state
            .routers
            .entry((project.to_string(), router.region.clone(), router.name.clone()))
            .or_insert_with(|| router.clone());
        Ok(())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> CloudResult<CreateOutcome> {
        let mut state = self.lock();
        state.enter("create_instance")?;
        if state.instances.contains_key(&spec.target) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let mut instance = MemoryInstance::new(&spec.startup_script);
        instance
            .labels
            .insert(OWNER_LABEL.to_string(), spec.target.owner_label());
        let (behaviour, window) = (state.boot.clone(), state.console_window);
        boot(&mut instance, &behaviour, window);
        state.instances.insert(spec.target.clone(), instance);
        Ok(CreateOutcome::Created)
    }

    async fn get_instance(&self, target: &InstanceRef) -> CloudResult<Option<InstanceInfo>> {
        let mut state = self.lock();
        state.enter("get_instance")?;
        Ok(state.instances.get(target).map(|i| InstanceInfo {
            name: target.name.clone(),
            status: i.status.clone(),
            internal_ip: Some("10.128.0.2".to_string()),
            creation_timestamp: None,
            last_start_timestamp: None,
            last_stop_timestamp: None,
            startup_script: i.metadata.get(STARTUP_SCRIPT_KEY).cloned(),
            labels: i.labels.clone(),
        }))
    }

    async fn start_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("start_instance")?;
        let (behaviour, window) = (state.boot.clone(), state.console_window);
        let instance = state.instance(target)?;
        if instance.status != InstanceStatus::Running {
            boot(instance, &behaviour, window);
        }
        Ok(())
    }

    async fn stop_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("stop_instance")?;
        state.instance(target)?.status = InstanceStatus::Terminated;
        Ok(())
    }

    async fn reset_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("reset_instance")?;
        let (behaviour, window) = (state.boot.clone(), state.console_window);
        let instance = state.instance(target)?;
        if instance.status != InstanceStatus::Running {
            return Err(CloudError::Api {
                status: 400,
                message: format!("instance {} is not running", target),
            });
        }
        boot(instance, &behaviour, window);
        Ok(())
    }

    async fn set_instance_metadata(
        &self,
        target: &InstanceRef,
        key: &str,
        value: &str,
    ) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("set_instance_metadata")?;
        state
            .instance(target)?
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_instance(&self, target: &InstanceRef) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("delete_instance")?;
        state.instances.remove(target);
        Ok(())
    }

    async fn delete_router(&self, project: &str, region: &str, name: &str) -> CloudResult<()> {
        let mut state = self.lock();
        state.enter("delete_router")?;
        state
            .routers
            .remove(&(project.to_string(), region.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_serial_port_output(
        &self,
        target: &InstanceRef,
        start: u64,
    ) -> CloudResult<ConsoleOutput> {
        let mut state = self.lock();
        state.enter("get_serial_port_output")?;
        Ok(state.instance(target)?.console_from(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> InstanceRef {
        InstanceRef::new("acme-agents", "us-central1-a", "claw")
    }

    fn spec(script: &str) -> InstanceSpec {
        InstanceSpec {
            target: target(),
            machine_type: "e2-small".into(),
            source_image: "projects/debian-cloud/global/images/family/debian-12".into(),
            service_account_email: "agent-sa@acme-agents.iam.gserviceaccount.com".into(),
            network_tag: "openclaw".into(),
            startup_script: script.into(),
        }
    }

    #[tokio::test]
    async fn test_create_boots_and_reports_markers() {
        let cloud = MemoryCloud::new();
        let outcome = cloud
            .create_instance(&spec("install_plugin postiz\ninstall_skill daily-posts '0 13 * * *'\n"))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Created);

        let console = cloud.get_serial_port_output(&target(), 0).await.unwrap().contents;
        assert_eq!(markers::plugin(&console, "postiz"), markers::InstallMark::Installed);
        assert_eq!(markers::skill(&console, "daily-posts"), markers::InstallMark::Installed);
        assert!(markers::boot_complete(&console));

        let again = cloud.create_instance(&spec("")).await.unwrap();
        assert_eq!(again, CreateOutcome::AlreadyExists);
        assert_eq!(cloud.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let cloud = MemoryCloud::new();
        cloud.fail_next("enable_api", CloudError::Transport("reset by peer".into()));
        assert!(cloud.enable_api("p", "compute.googleapis.com").await.is_err());
        assert!(cloud.enable_api("p", "compute.googleapis.com").await.is_ok());
        assert_eq!(cloud.calls_to("enable_api"), 2);

        cloud.fail_always("delete_router", CloudError::Api { status: 403, message: "denied".into() });
        assert!(cloud.delete_router("p", "r", "n").await.is_err());
        assert!(cloud.delete_router("p", "r", "n").await.is_err());
        cloud.clear_failures();
        assert!(cloud.delete_router("p", "r", "n").await.is_ok());
    }

    #[tokio::test]
    async fn test_firewall_conflict_and_hang() {
        let cloud = MemoryCloud::with_boot(BootBehaviour::Hang);
        let rule = FirewallRule {
            name: "deny-all-ingress".into(),
            action: super::super::FirewallAction::Deny,
            priority: 2000,
            protocol: "all".into(),
            ports: vec![],
            source_ranges: vec!["0.0.0.0/0".into()],
            target_tags: vec!["openclaw".into()],
        };
        cloud.set_firewall_rule("p", &rule).await.unwrap();
        assert!(matches!(
            cloud.set_firewall_rule("p", &rule).await,
            Err(CloudError::Conflict(_))
        ));
        assert_eq!(cloud.firewall_rules().len(), 1);

        cloud.create_instance(&spec("")).await.unwrap();
        let output = cloud.get_serial_port_output(&target(), 0).await.unwrap();
        assert_eq!(output, ConsoleOutput::default());
    }

    #[tokio::test]
    async fn test_reset_requires_running() {
        let cloud = MemoryCloud::new();
        cloud.create_instance(&spec("")).await.unwrap();
        cloud.stop_instance(&target()).await.unwrap();
        assert!(cloud.reset_instance(&target()).await.is_err());
        cloud.start_instance(&target()).await.unwrap();
        assert_eq!(cloud.boot_count(&target()), 2);
    }

    #[tokio::test]
    async fn test_console_window_drops_old_output() {
        let cloud = MemoryCloud::new();
        cloud.set_console_window(64);
        cloud.create_instance(&spec("install_plugin postiz\n")).await.unwrap();

        let first = cloud.get_serial_port_output(&target(), 0).await.unwrap();
        assert_eq!(first.contents.len(), 64);
        assert!(first.next > 64);
        assert!(markers::boot_complete(&first.contents));

        let idle = cloud.get_serial_port_output(&target(), first.next).await.unwrap();
        assert_eq!(idle.contents, "");
        assert_eq!(idle.next, first.next);

        cloud.reset_instance(&target()).await.unwrap();
        let second = cloud.get_serial_port_output(&target(), first.next).await.unwrap();
        assert!(markers::boot_complete(&second.contents));
        assert_eq!(second.next, first.next * 2);
    }

    #[tokio::test]
    async fn test_created_instance_carries_owner_label() {
        let cloud = MemoryCloud::new();
        cloud.create_instance(&spec("")).await.unwrap();
        let info = cloud.get_instance(&target()).await.unwrap().unwrap();
        assert!(info.is_owned_by(&target()));

        let other = InstanceRef::new("acme-agents", "us-central1-a", "legacy");
        cloud.insert_unmanaged_instance(&other, "");
        let info = cloud.get_instance(&other).await.unwrap().unwrap();
        assert!(!info.is_owned_by(&other));
        assert_eq!(info.status, InstanceStatus::Running);
    }
}
