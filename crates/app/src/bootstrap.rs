use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};
use tokio::task::JoinHandle;
use tracing::info;

use satsang_backend::{BackendClient, BackendConfig, BackendError, DirectMessageApi, spawn_heartbeat};
use satsang_chat::{ChatSession, ProfileStore, UserProfile};
use satsang_llm::{AssistantClient, AssistantConfig, CompletionError, create_client};
use satsang_storage::KeyValueStore;

use crate::settings::AppSettings;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BootstrapError {
    #[snafu(display("failed to construct the assistant client"))]
    BuildAssistant {
        stage: &'static str,
        source: CompletionError,
    },
    #[snafu(display("failed to construct the backend client"))]
    BuildBackend {
        stage: &'static str,
        source: BackendError,
    },
}

/// Everything a front end needs, wired together: the session, the clients
/// behind it, profile access, and the presence heartbeat for a logged-in
/// user.
pub struct AppRuntime {
    pub settings: Arc<AppSettings>,
    pub session: ChatSession,
    pub assistant: Arc<dyn AssistantClient>,
    pub backend: Arc<BackendClient>,
    pub profiles: ProfileStore,
    pub profile: Option<UserProfile>,
    pub heartbeat: Option<JoinHandle<()>>,
}

impl AppRuntime {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.settings.backend.heartbeat_secs)
    }
}

pub async fn build_runtime(
    settings: Arc<AppSettings>,
    store: Arc<dyn KeyValueStore>,
) -> Result<AppRuntime, BootstrapError> {
    let endpoint = settings
        .assistant
        .resolved_endpoint(&settings.backend.base_url);
    let mut assistant_config = AssistantConfig::new(
        &endpoint,
        &settings.assistant.api_key,
        &settings.assistant.model,
    )
    .with_temperature(settings.assistant.temperature);
    if !settings.assistant.provider.trim().is_empty() {
        assistant_config = assistant_config.with_provider_hint(settings.assistant.provider.trim());
    }
    if let Some(max_tokens) = settings.assistant.max_tokens {
        assistant_config = assistant_config.with_max_tokens(max_tokens);
    }
    let assistant = create_client(assistant_config).context(BuildAssistantSnafu {
        stage: "assistant-client",
    })?;

    let backend_config = BackendConfig::new(&settings.backend.base_url)
        .with_timeout(Duration::from_secs(settings.backend.timeout_secs));
    let backend = Arc::new(BackendClient::new(backend_config).context(BuildBackendSnafu {
        stage: "backend-client",
    })?);

    let profiles = ProfileStore::new(store.clone());
    let profile = profiles.load().await;

    let peers: Arc<dyn DirectMessageApi> = backend.clone();
    let session = ChatSession::open(
        assistant.clone(),
        peers,
        store,
        settings.to_session_config(),
    )
    .await;

    let mut heartbeat = None;
    if let Some(profile) = &profile {
        info!(user = %profile.id, "resuming stored identity");
        session.set_local_user(Some(profile.id)).await;
        heartbeat = Some(spawn_heartbeat(
            backend.clone(),
            profile.id,
            Duration::from_secs(settings.backend.heartbeat_secs),
        ));
    }

    Ok(AppRuntime {
        settings,
        session,
        assistant,
        backend,
        profiles,
        profile,
        heartbeat,
    })
}
