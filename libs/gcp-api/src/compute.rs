//! Compute Engine models (instances, firewalls, routers, operations)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Long-running operation returned by mutating Compute calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: Option<String>,
    /// PENDING, RUNNING or DONE
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<OperationError>,
    /// URL to poll for completion
    #[serde(default)]
    pub self_link: Option<String>,
    /// HTTP status equivalent of a failed operation
    #[serde(default)]
    pub http_error_status_code: Option<u16>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status.as_deref() == Some("DONE")
    }

    /// First error message reported by a finished operation
    pub fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .and_then(|e| e.errors.first())
            .map(|e| format!("{}: {}", e.code, e.message))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Instance resource as returned by `instances.get`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_timestamp: Option<String>,
    #[serde(default)]
    pub last_start_timestamp: Option<String>,
    #[serde(default)]
    pub last_stop_timestamp: Option<String>,
}

impl Instance {
    /// Internal IP of the first network interface
    pub fn internal_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|n| n.network_ip.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, rename = "networkIP", skip_serializing_if = "Option::is_none")]
    pub network_ip: Option<String>,
}

/// Instance metadata; `fingerprint` must be echoed back on `setMetadata`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

impl Metadata {
    /// Insert or replace a metadata item
    pub fn upsert(&mut self, key: &str, value: &str) {
        match self.items.iter_mut().find(|i| i.key == key) {
            Some(item) => item.value = value.to_string(),
            None => self.items.push(MetadataItem {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|i| i.key == key)
            .map(|i| i.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

/// Body of `instances.insert`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInsert {
    pub name: String,
    pub machine_type: String,
    pub disks: Vec<AttachedDisk>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub service_accounts: Vec<ServiceAccountRef>,
    pub tags: Tags,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    pub boot: bool,
    pub auto_delete: bool,
    pub initialize_params: DiskInitializeParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInitializeParams {
    pub source_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    pub email: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub items: Vec<String>,
}

/// Firewall rule resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Firewall {
    pub name: String,
    pub direction: String,
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<FirewallProtocol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denied: Vec<FirewallProtocol>,
    #[serde(default)]
    pub source_ranges: Vec<String>,
    #[serde(default)]
    pub target_tags: Vec<String>,
    #[serde(default)]
    pub network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallProtocol {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

/// Cloud Router resource; unknown fields survive a get/patch round trip
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub name: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub nats: Vec<RouterNat>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterNat {
    pub name: String,
    pub nat_ip_allocate_option: String,
    pub source_subnetwork_ip_ranges_to_nat: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response of `instances.getSerialPortOutput`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialPortOutput {
    #[serde(default)]
    pub contents: String,
    /// Position after the returned bytes, encoded as a decimal string
    #[serde(default)]
    pub next: Option<String>,
    /// Position of the first returned byte; later than the requested start
    /// when older output was discarded
    #[serde(default)]
    pub start: Option<String>,
}

impl SerialPortOutput {
    pub fn next_offset(&self) -> Option<u64> {
        self.next.as_deref().and_then(|n| n.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_parses_network_ip() {
        let instance: Instance = serde_json::from_str(
            r#"{
                "name": "claw-vm",
                "status": "RUNNING",
                "networkInterfaces": [{"network": "default", "networkIP": "10.128.0.2"}],
                "lastStartTimestamp": "2026-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(instance.internal_ip(), Some("10.128.0.2"));
        assert_eq!(instance.status, "RUNNING");
        assert!(instance.labels.is_empty());
    }

    #[test]
    fn test_serial_output_next_offset() {
        let output: SerialPortOutput =
            serde_json::from_str(r#"{"contents":"boot\n","start":"1048576","next":"1048581"}"#)
                .unwrap();
        assert_eq!(output.next_offset(), Some(1_048_581));
        assert_eq!(SerialPortOutput::default().next_offset(), None);
    }

    #[test]
    fn test_router_keeps_unknown_fields() {
        let json = r#"{"name":"r","network":"n","nats":[],"selfLink":"x","bgp":{"asn":64512}}"#;
        let router: Router = serde_json::from_str(json).unwrap();
        let back = serde_json::to_value(&router).unwrap();
        assert_eq!(back["selfLink"], "x");
        assert_eq!(back["bgp"]["asn"], 64512);
    }

    #[test]
    fn test_metadata_upsert_replaces_existing_key() {
        let mut metadata = Metadata::default();
        metadata.upsert("startup-script", "a");
        metadata.upsert("other", "b");
        metadata.upsert("startup-script", "c");
        assert_eq!(metadata.items.len(), 2);
        assert_eq!(metadata.get("startup-script"), Some("c"));
    }

    #[test]
    fn test_firewall_serializes_ip_protocol() {
        let rule = Firewall {
            name: "allow-iap-ssh".into(),
            direction: "INGRESS".into(),
            priority: 1000,
            allowed: vec![FirewallProtocol {
                ip_protocol: "tcp".into(),
                ports: vec!["22".into()],
            }],
            ..Default::default()
        };
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["allowed"][0]["IPProtocol"], "tcp");
        assert!(value.get("denied").is_none());
    }
}
