//! Google Cloud REST wire models
//!
//! Only the subset of fields clawctl reads or writes is modelled. Resources
//! that are read, modified and written back (routers, IAM policies) keep the
//! unknown fields in a flattened map so a round trip never drops data.

pub mod compute;
pub mod iam;
pub mod secrets;

use serde::{Deserialize, Serialize};

/// Google API error envelope: `{"error": {"code", "message", "status"}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
}

/// Error detail inside [`ApiErrorBody`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ApiErrorBody {
    /// Best human-readable message: `message`, then `status`
    pub fn message(&self) -> Option<String> {
        let detail = self.error.as_ref()?;
        detail
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| detail.status.clone())
    }
}
