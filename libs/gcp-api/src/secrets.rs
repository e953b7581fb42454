//! Secret Manager models

use serde::{Deserialize, Serialize};

/// Body of `secrets.create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSecretRequest {
    pub replication: Replication,
}

impl CreateSecretRequest {
    pub fn automatic() -> Self {
        Self {
            replication: Replication {
                automatic: serde_json::Map::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replication {
    pub automatic: serde_json::Map<String, serde_json::Value>,
}

/// Body of `secrets.addVersion`; `data` is base64
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSecretVersionRequest {
    pub payload: SecretPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretPayload {
    pub data: String,
}
