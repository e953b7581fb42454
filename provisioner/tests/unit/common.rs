//! Shared fixtures

use std::collections::BTreeMap;
use std::sync::Arc;

use clawctl::app::state::AppState;
use clawctl::cloud::MemoryCloud;
use clawctl::deploy::PipelineSettings;
use clawctl::models::{Branding, DeploymentRequest, Models};
use clawctl::store::MemoryStore;
use secrecy::SecretString;

pub struct Harness {
    pub cloud: Arc<MemoryCloud>,
    pub store: Arc<MemoryStore>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cloud(MemoryCloud::new())
    }

    pub fn with_cloud(cloud: MemoryCloud) -> Self {
        let cloud = Arc::new(cloud);
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(
            cloud.clone(),
            store.clone(),
            PipelineSettings::immediate(),
        ));
        Self {
            cloud,
            store,
            state,
        }
    }
}

pub fn request() -> DeploymentRequest {
    DeploymentRequest {
        project_id: "acme-agents".into(),
        zone: "us-central1-a".into(),
        vm_name: "claw".into(),
        machine_type: "e2-small".into(),
        branding: Branding {
            bot_name: "Dyno".into(),
            personality: "helpful".into(),
            system_prompt: None,
        },
        models: Models {
            primary: "google/gemini-2.5-flash".into(),
            fallbacks: vec!["anthropic/claude-sonnet-4".into()],
        },
        enabled_plugins: ["postiz".to_string()].into_iter().collect(),
        enabled_skills: ["daily-briefing".to_string()].into_iter().collect(),
        skill_crons: BTreeMap::new(),
        api_keys: [(
            "telegram-bot-token".to_string(),
            SecretString::from("123:abc".to_string()),
        )]
        .into_iter()
        .collect(),
    }
}
