//! Data models

pub mod deployment;

pub use deployment::{
    Branding, DeploymentRecord, DeploymentRequest, DeploymentStatus, Models, PluginConfig,
    SecretReference, SkillConfig,
};
