//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, StoreOptions};
use crate::authn::{AccessTokenSource, StaticToken, TokenFile};
use crate::cloud::{CloudApi, GcpClient};
use crate::deploy::{KeyedLocks, Pipeline, PipelineSettings};
use crate::errors::ClawError;
use crate::filesys::file::File;
use crate::lifecycle::LifecycleController;
use crate::store::{DeploymentStore, JsonFileStore, MemoryStore};

/// Everything the control surface needs, shared behind an `Arc`
pub struct AppState {
    pub cloud: Arc<dyn CloudApi>,
    pub store: Arc<dyn DeploymentStore>,
    pub pipeline: Arc<Pipeline>,
    pub lifecycle: Arc<LifecycleController>,
    /// Per-VM locks shared by the pipeline and the controller
    pub locks: Arc<KeyedLocks>,
}

impl AppState {
    /// Wire the pipeline and controller to one cloud, one store and one
    /// lock table
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        store: Arc<dyn DeploymentStore>,
        settings: PipelineSettings,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let lifecycle = Arc::new(LifecycleController::new(
            cloud.clone(),
            store.clone(),
            locks.clone(),
            &settings,
        ));
        let pipeline = Arc::new(Pipeline::new(
            cloud.clone(),
            store.clone(),
            locks.clone(),
            settings,
        ));
        Self {
            cloud,
            store,
            pipeline,
            lifecycle,
            locks,
        }
    }

    /// Build state from options: the REST cloud client and the configured store
    pub async fn init(options: &AppOptions) -> Result<Self, ClawError> {
        info!("Initializing application state...");

        let tokens: Arc<dyn AccessTokenSource> = match &options.gcp.token_file {
            Some(path) => {
                info!("reading access tokens from {}", path.display());
                Arc::new(TokenFile::new(File::new(path)))
            }
            None => Arc::new(StaticToken::from_env(&options.gcp.token_env)?),
        };
        let cloud: Arc<dyn CloudApi> = Arc::new(GcpClient::new(tokens, options.gcp.to_options())?);

        let store: Arc<dyn DeploymentStore> = match &options.store {
            StoreOptions::Memory => {
                info!("using in-memory deployment store");
                Arc::new(MemoryStore::new())
            }
            StoreOptions::File(path) => Arc::new(JsonFileStore::open(File::new(path)).await?),
        };

        Ok(Self::new(cloud, store, options.pipeline.clone()))
    }
}
