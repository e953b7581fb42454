//! clawctl library
//!
//! Provisions single-VM agent deployments on Google Cloud and manages their
//! lifecycle: boot payload assembly, the idempotent provisioning pipeline,
//! deployment records and the HTTP control surface.

pub mod app;
pub mod authn;
pub mod boot;
pub mod cloud;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod lifecycle;
pub mod logs;
pub mod models;
pub mod registry;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
