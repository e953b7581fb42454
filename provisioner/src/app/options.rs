//! Application configuration options

use std::time::Duration;

use crate::deploy::PipelineSettings;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{GcpSettings, Settings, StoreKind};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Google Cloud access
    pub gcp: GcpSettings,

    /// Provisioning pipeline settings
    pub pipeline: PipelineSettings,

    /// Deployment store
    pub store: StoreOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            server: ServerOptions::default(),
            gcp: GcpSettings::default(),
            pipeline: PipelineSettings::default(),
            store: StoreOptions::Memory,
        }
    }
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let store = match settings.store.kind {
            StoreKind::Memory => StoreOptions::Memory,
            StoreKind::File => StoreOptions::File(
                layout
                    .store_file(settings.store.path.as_deref())
                    .path()
                    .to_path_buf(),
            ),
        };
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                permissive_cors: settings.server.permissive_cors,
            },
            gcp: settings.gcp.clone(),
            pipeline: settings.provisioning.to_pipeline(),
            store,
            layout,
        }
    }
}

/// Lifecycle options for the service
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Where deployment records live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOptions {
    Memory,
    File(std::path::PathBuf),
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    pub permissive_cors: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
            permissive_cors: true,
        }
    }
}
