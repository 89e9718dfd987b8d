use std::sync::Arc;

mod catalog;
mod client;
mod rig_adapter;

pub use catalog::{
    DEFAULT_AUDIO_MODEL, DEFAULT_AUDIO_PROVIDER, DEFAULT_IMAGE_MODEL, DEFAULT_IMAGE_PROVIDER,
    DEFAULT_TEXT_MODEL, DEFAULT_TEXT_PROVIDER, IMAGE_ONLY_PROVIDERS, ModelCache, ModelCatalog,
    ModelCatalogSource, ModelEntry, ModelPurpose, ModelSelection, default_model_entries,
    default_selection, get_model_cache, resolve_selection,
};
pub use client::{
    AssistantClient, AssistantConfig, AssistantReply, BoxFuture, CancelHandle, ChatRole, ChatTurn,
    CompletionError, CompletionHandle, CompletionRequest, CompletionResult, CompletionWorker,
    DEFAULT_TEMPERATURE, TokenUsage,
};
pub use rig_adapter::{OPENAI_COMPATIBLE_CLIENT_ID, RigAssistantClient};

pub fn create_client(mut config: AssistantConfig) -> CompletionResult<Arc<dyn AssistantClient>> {
    if config.kind.trim().is_empty() {
        config.kind = OPENAI_COMPATIBLE_CLIENT_ID.to_string();
    }

    match config.kind.as_str() {
        "openai" | "openai-compatible" => {
            config.kind = OPENAI_COMPATIBLE_CLIENT_ID.to_string();
            Ok(Arc::new(RigAssistantClient::new(config)?))
        }
        _ => Err(CompletionError::UnsupportedClient {
            stage: "create-client",
            kind: config.kind,
        }),
    }
}
