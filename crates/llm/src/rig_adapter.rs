use std::sync::Arc;

use rig::http_client::{self, HttpClientExt, NoBody};
use rig::providers::openai;
use serde::Deserialize;
use snafu::{ResultExt, ensure};
use tokio::sync::oneshot;

use crate::catalog::{
    ModelCache, ModelCatalog, ModelEntry, default_model_entries, get_model_cache,
};
use crate::client::{
    AssistantClient, AssistantConfig, AssistantReply, BoxFuture, ChatRole, CompletionError,
    CompletionHandle, CompletionPayloadParseSnafu, CompletionRequest,
    CompletionResult, CompletionStatusSnafu, CompletionWorker, EmptyTurnSetSnafu, HttpClientSnafu,
    MissingApiKeySnafu, ModelFetchStatusSnafu, ModelPayloadParseSnafu, TokenUsage,
    make_completion_channel,
};

pub const OPENAI_COMPATIBLE_CLIENT_ID: &str = "openai";

/// Error bodies surfaced from the completion endpoint are cut at this many
/// characters.
const STATUS_BODY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct ModelListPayload {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
    #[serde(rename = "_metadata", default)]
    metadata: Option<ProxyMetadata>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: ChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Multiplexing proxies annotate responses with the provider they actually
/// routed to and the model's upstream id; when present these override the
/// requested values in the surfaced reply.
#[derive(Debug, Deserialize)]
struct ProxyMetadata {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    original_model: Option<String>,
}

pub struct RigAssistantClient {
    config: AssistantConfig,
    fallback_entries: Vec<ModelEntry>,
    model_cache: Arc<ModelCache>,
}

impl RigAssistantClient {
    pub fn new(config: AssistantConfig) -> CompletionResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-client-new",
                endpoint: config.endpoint.clone(),
            }
        );

        Ok(Self {
            config,
            fallback_entries: default_model_entries(),
            model_cache: get_model_cache(),
        })
    }

    fn build_client(config: &AssistantConfig) -> CompletionResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    async fn fetch_models_from_endpoint(&self) -> CompletionResult<Vec<ModelEntry>> {
        let client = Self::build_client(&self.config)?;
        let request = client
            .get("/models")
            .context(HttpClientSnafu {
                stage: "build-model-request",
            })?
            .body(NoBody)
            .map_err(|source| CompletionError::BuildHttpRequestBody {
                stage: "build-model-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(request).await.context(HttpClientSnafu {
            stage: "send-model-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-model-response",
        })?;

        if !status.is_success() {
            return ModelFetchStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        let listing: ModelListPayload =
            serde_json::from_str(&payload).context(ModelPayloadParseSnafu {
                stage: "parse-model-response",
            })?;

        let mut entries = listing.data;
        entries.retain(|entry| !entry.id.trim().is_empty());
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|a, b| a.id == b.id);
        Ok(entries)
    }

    fn resolved_model(config: &AssistantConfig, request: &CompletionRequest) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| config.default_model.clone())
    }

    fn resolved_provider(
        config: &AssistantConfig,
        request: &CompletionRequest,
    ) -> Option<String> {
        request
            .provider
            .clone()
            .or_else(|| config.default_provider.clone())
    }

    fn merged_preamble(request: &CompletionRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig exposes a single preamble field, so system-role turns are folded
        // into it while user/assistant turns ride as chat messages.
        for turn in &request.turns {
            if matches!(turn.role, ChatRole::System) && !turn.content.trim().is_empty() {
                preamble_parts.push(turn.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    fn build_completion_body(
        config: &AssistantConfig,
        request: &CompletionRequest,
        model_id: &str,
        provider_hint: Option<&str>,
    ) -> CompletionResult<serde_json::Value> {
        let sendable = request
            .turns
            .iter()
            .filter(|turn| !matches!(turn.role, ChatRole::System))
            .count();
        if sendable == 0 {
            tracing::warn!(
                model_id = %model_id,
                turn_count = request.turns.len(),
                "no user/assistant turns remain after filtering"
            );
            return EmptyTurnSetSnafu {
                stage: "completion-filter-turns",
            }
            .fail();
        }

        let mut messages = Vec::with_capacity(sendable + 1);
        if let Some(preamble) = Self::merged_preamble(request) {
            messages.push(serde_json::json!({ "role": "system", "content": preamble }));
        }
        for turn in &request.turns {
            let role = match turn.role {
                ChatRole::System => continue,
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(serde_json::json!({ "role": role, "content": turn.content }));
        }

        let mut body = serde_json::json!({
            "model": model_id,
            "messages": messages,
            "temperature": request.temperature.unwrap_or(config.temperature),
        });
        if let Some(max_tokens) = request.max_tokens.or(config.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        // Multiplexing proxies route on a `provider` field in the body.
        if let Some(provider) = provider_hint {
            body["provider"] = serde_json::json!(provider);
        }
        Ok(body)
    }

    fn reply_from_payload(
        payload: CompletionPayload,
        requested_model: String,
        provider_hint: Option<String>,
    ) -> AssistantReply {
        let content = payload
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        let provider = payload
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.provider.clone())
            .or(provider_hint);
        let model = payload
            .metadata
            .and_then(|metadata| metadata.original_model)
            .or(payload.model)
            .or(Some(requested_model));
        let usage = payload.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });
        AssistantReply {
            content,
            model,
            provider,
            usage,
        }
    }

    /// The completion POST goes through rig's http client rather than its
    /// completion builder: the raw payload carries the proxy's `_metadata`
    /// annotation, which the typed response would drop.
    async fn request_completion(
        config: &AssistantConfig,
        request: &CompletionRequest,
    ) -> CompletionResult<AssistantReply> {
        let client = Self::build_client(config)?;
        let model_id = Self::resolved_model(config, request);
        let provider_hint = Self::resolved_provider(config, request);
        let body =
            Self::build_completion_body(config, request, &model_id, provider_hint.as_deref())?;

        let encoded =
            serde_json::to_vec(&body).map_err(|source| CompletionError::BuildHttpRequestBody {
                stage: "encode-completion-body",
                message: source.to_string(),
            })?;
        let http_request = client
            .post("/chat/completions")
            .context(HttpClientSnafu {
                stage: "build-completion-request",
            })?
            .header("Content-Type", "application/json")
            .body(encoded)
            .map_err(|source| CompletionError::BuildHttpRequestBody {
                stage: "build-completion-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(http_request).await.context(HttpClientSnafu {
            stage: "send-completion-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-completion-response",
        })?;

        if !status.is_success() {
            return CompletionStatusSnafu {
                stage: "completion-http-status",
                status: status.as_u16(),
                body: payload.chars().take(STATUS_BODY_LIMIT).collect::<String>(),
            }
            .fail();
        }

        let decoded: CompletionPayload =
            serde_json::from_str(&payload).context(CompletionPayloadParseSnafu {
                stage: "parse-completion-response",
            })?;
        Ok(Self::reply_from_payload(decoded, model_id, provider_hint))
    }

    async fn run_completion_worker(
        config: AssistantConfig,
        request: CompletionRequest,
        outcome_tx: oneshot::Sender<CompletionResult<AssistantReply>>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let outcome = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(endpoint = %config.endpoint, "completion cancelled");
                Err(CompletionError::Cancelled {
                    stage: "completion-worker",
                })
            }
            result = Self::request_completion(&config, &request) => result,
        };

        if let Err(error) = &outcome
            && !error.is_cancelled()
        {
            tracing::warn!(
                endpoint = %config.endpoint,
                error = %error,
                "completion request failed"
            );
        }

        let _ = outcome_tx.send(outcome);
    }
}

impl AssistantClient for RigAssistantClient {
    fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionHandle> {
        ensure!(
            request
                .turns
                .iter()
                .any(|turn| !matches!(turn.role, ChatRole::System)),
            EmptyTurnSetSnafu { stage: "complete" }
        );

        let (outcome_tx, outcome_rx, cancel, cancel_rx) = make_completion_channel();
        let worker: CompletionWorker = Box::pin(Self::run_completion_worker(
            self.config.clone(),
            request,
            outcome_tx,
            cancel_rx,
        ));

        Ok(CompletionHandle {
            worker,
            outcome: outcome_rx,
            cancel,
        })
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, CompletionResult<ModelCatalog>> {
        Box::pin(async move {
            let endpoint = self.config.endpoint.as_str();
            if let Some(entries) = self.model_cache.get_fresh(endpoint).await {
                return Ok(ModelCatalog::from_cache_fresh(entries));
            }

            // Fallback order prefers availability over strict freshness:
            // endpoint first, then stale cache, then static defaults.
            match self.fetch_models_from_endpoint().await {
                Ok(entries) => {
                    self.model_cache.set(endpoint, entries.clone()).await;
                    Ok(ModelCatalog::from_provider_api(entries))
                }
                Err(error) => {
                    let error_message = error.to_string();

                    if let Some(entries) = self.model_cache.get_any(endpoint).await {
                        tracing::warn!(
                            endpoint = %endpoint,
                            cached_model_count = entries.len(),
                            error = %error_message,
                            "model fetch failed; serving stale cached models"
                        );
                        return Ok(ModelCatalog::from_cache_stale(entries, error_message));
                    }

                    tracing::warn!(
                        endpoint = %endpoint,
                        fallback_model_count = self.fallback_entries.len(),
                        error = %error_message,
                        "model fetch failed without cache; serving static fallback models"
                    );

                    Ok(ModelCatalog::from_static_fallback(
                        self.fallback_entries.clone(),
                        error_message,
                    ))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatTurn;

    fn test_config() -> AssistantConfig {
        AssistantConfig::new("http://127.0.0.1:9/api/v1", "test-key", "test-model")
            .with_provider_hint("DeepInfra")
    }

    #[test]
    fn constructor_rejects_missing_api_key() {
        let config = AssistantConfig::new("http://127.0.0.1:9/api/v1", "", "test-model");
        let Err(error) = RigAssistantClient::new(config) else {
            panic!("missing key accepted");
        };
        assert!(matches!(error, CompletionError::MissingApiKey { .. }));
    }

    #[test]
    fn complete_rejects_requests_without_sendable_turns() {
        let client = RigAssistantClient::new(test_config()).expect("client");
        let request = CompletionRequest::new(vec![ChatTurn::system("guidance only")]);
        let Err(error) = client.complete(request) else {
            panic!("request without sendable turns accepted");
        };
        assert!(matches!(error, CompletionError::EmptyTurnSet { .. }));
    }

    #[test]
    fn merged_preamble_folds_system_turns() {
        let request = CompletionRequest::new(vec![
            ChatTurn::system("first instruction"),
            ChatTurn::user("hello"),
            ChatTurn::system("second instruction"),
        ])
        .with_preamble("base preamble");

        let merged = RigAssistantClient::merged_preamble(&request).expect("preamble");
        assert_eq!(
            merged,
            "base preamble\n\nfirst instruction\n\nsecond instruction"
        );
    }

    #[test]
    fn merged_preamble_is_none_without_system_content() {
        let request = CompletionRequest::new(vec![ChatTurn::user("hello")]);
        assert_eq!(RigAssistantClient::merged_preamble(&request), None);
    }

    #[test]
    fn request_fields_override_config_defaults() {
        let config = test_config();
        let request = CompletionRequest::new(vec![ChatTurn::user("hello")])
            .with_model("other-model")
            .with_provider_hint("OpenAIFM");
        assert_eq!(
            RigAssistantClient::resolved_model(&config, &request),
            "other-model"
        );
        assert_eq!(
            RigAssistantClient::resolved_provider(&config, &request).as_deref(),
            Some("OpenAIFM")
        );

        let bare = CompletionRequest::new(vec![ChatTurn::user("hello")]);
        assert_eq!(
            RigAssistantClient::resolved_model(&config, &bare),
            "test-model"
        );
        assert_eq!(
            RigAssistantClient::resolved_provider(&config, &bare).as_deref(),
            Some("DeepInfra")
        );
    }

    #[test]
    fn model_list_payload_decodes_openai_shape() {
        let payload = r#"{
            "object": "list",
            "data": [
                {"id": "b-model", "provider": "DeepInfra"},
                {"id": "a-model"},
                {"id": "a-model"},
                {"id": "  "}
            ]
        }"#;
        let listing: ModelListPayload = serde_json::from_str(payload).expect("decode");
        let mut entries = listing.data;
        entries.retain(|entry| !entry.id.trim().is_empty());
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|a, b| a.id == b.id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "a-model");
        assert_eq!(entries[1].id, "b-model");
    }

    #[test]
    fn completion_body_carries_provider_and_folded_preamble() {
        let config = test_config();
        let request = CompletionRequest::new(vec![
            ChatTurn::system("be gentle"),
            ChatTurn::user("hello"),
            ChatTurn::assistant("namaste"),
        ]);
        let body =
            RigAssistantClient::build_completion_body(&config, &request, "test-model", Some("DeepInfra"))
                .expect("body");

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["provider"], "DeepInfra");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be gentle");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["max_tokens"], serde_json::Value::Null);
    }

    #[test]
    fn proxy_metadata_overrides_surfaced_model_and_provider() {
        let payload = r#"{
            "model": "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            "choices": [{"message": {"role": "assistant", "content": "om"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12},
            "_metadata": {"provider": "DeepInfra", "original_model": "llama-3.3-70b"}
        }"#;
        let decoded: CompletionPayload = serde_json::from_str(payload).expect("decode");
        let reply = RigAssistantClient::reply_from_payload(
            decoded,
            "requested-model".to_string(),
            Some("OpenAIFM".to_string()),
        );

        assert_eq!(reply.content, "om");
        assert_eq!(reply.model.as_deref(), Some("llama-3.3-70b"));
        assert_eq!(reply.provider.as_deref(), Some("DeepInfra"));
        assert_eq!(
            reply.usage,
            Some(TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 7,
                total_tokens: 12,
            })
        );
    }

    #[test]
    fn plain_responses_keep_the_served_model_and_requested_provider() {
        let payload = r#"{
            "model": "served-model",
            "choices": [{"message": {"content": "om"}}]
        }"#;
        let decoded: CompletionPayload = serde_json::from_str(payload).expect("decode");
        let reply = RigAssistantClient::reply_from_payload(
            decoded,
            "requested-model".to_string(),
            Some("DeepInfra".to_string()),
        );

        assert_eq!(reply.model.as_deref(), Some("served-model"));
        assert_eq!(reply.provider.as_deref(), Some("DeepInfra"));
        assert_eq!(reply.usage, None);
    }

    #[tokio::test]
    async fn cancelling_before_completion_resolves_cancelled() {
        let client = RigAssistantClient::new(test_config()).expect("client");
        let request = CompletionRequest::new(vec![ChatTurn::user("hello")]);
        let handle = client.complete(request).expect("handle");

        let CompletionHandle {
            worker,
            outcome,
            mut cancel,
        } = handle;
        assert!(cancel.cancel());
        tokio::spawn(worker);

        let result = outcome.await.expect("worker resolves outcome");
        assert!(matches!(result, Err(CompletionError::Cancelled { .. })));
    }
}
