use snafu::Snafu;
use tokio::sync::oneshot;

use crate::catalog::ModelCatalog;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    pub kind: String,
    pub endpoint: String,
    pub api_key: String,
    pub default_model: String,
    pub default_provider: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u64>,
}

impl AssistantConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            kind: crate::rig_adapter::OPENAI_COMPATIBLE_CLIENT_ID.to_string(),
            endpoint: endpoint.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            default_model: default_model.into(),
            default_provider: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into().trim().to_string();
        self
    }

    pub fn with_provider_hint(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// One outbound completion. Unset fields fall back to the client config.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub turns: Vec<ChatTurn>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl CompletionRequest {
    pub fn new(turns: Vec<ChatTurn>) -> Self {
        Self {
            model: None,
            provider: None,
            turns,
            preamble: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider_hint(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub content: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub use futures::future::BoxFuture;

pub type CompletionWorker = BoxFuture<'static, ()>;
pub type CompletionResult<T> = Result<T, CompletionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompletionError {
    #[snafu(display("missing API key for endpoint '{endpoint}'"))]
    MissingApiKey {
        stage: &'static str,
        endpoint: String,
    },
    #[snafu(display("assistant client kind '{kind}' is not supported"))]
    UnsupportedClient { stage: &'static str, kind: String },
    #[snafu(display("completion request has no sendable turns"))]
    EmptyTurnSet { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("failed to finalize HTTP request body: {message}"))]
    BuildHttpRequestBody {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("model endpoint returned status {status}: {body}"))]
    ModelFetchStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse model list payload"))]
    ModelPayloadParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("completion endpoint returned status {status}: {body}"))]
    CompletionStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse completion payload"))]
    CompletionPayloadParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("completion was cancelled"))]
    Cancelled { stage: &'static str },
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Fires the cancellation signal on an explicit `cancel` or when dropped,
/// so an abandoned request never keeps its worker alive.
pub struct CancelHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancelHandle {
    pub fn new(cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// `complete` performs no I/O itself: the caller spawns `worker` and awaits
/// `outcome`, which resolves exactly once unless the worker is dropped.
pub struct CompletionHandle {
    pub worker: CompletionWorker,
    pub outcome: oneshot::Receiver<CompletionResult<AssistantReply>>,
    pub cancel: CancelHandle,
}

pub trait AssistantClient: Send + Sync {
    fn complete(&self, request: CompletionRequest) -> CompletionResult<CompletionHandle>;
    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, CompletionResult<ModelCatalog>>;
}

pub(crate) fn make_completion_channel() -> (
    oneshot::Sender<CompletionResult<AssistantReply>>,
    oneshot::Receiver<CompletionResult<AssistantReply>>,
    CancelHandle,
    oneshot::Receiver<()>,
) {
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        outcome_tx,
        outcome_rx,
        CancelHandle::new(cancel_tx),
        cancel_rx,
    )
}
