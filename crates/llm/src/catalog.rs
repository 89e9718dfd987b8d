use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

pub const DEFAULT_TEXT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo";
pub const DEFAULT_TEXT_PROVIDER: &str = "DeepInfra";
pub const DEFAULT_AUDIO_MODEL: &str = "alloy";
pub const DEFAULT_AUDIO_PROVIDER: &str = "OpenAIFM";
pub const DEFAULT_IMAGE_MODEL: &str = "flux";
pub const DEFAULT_IMAGE_PROVIDER: &str = "PollinationsAI";

/// Providers that only serve image generation; text traffic aimed at them
/// is re-routed to the text default.
pub const IMAGE_ONLY_PROVIDERS: &[&str] = &["PollinationsAI"];

/// One entry of the `/models` listing. Multiplexing proxies attach more
/// fields; only the ones the app routes on are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: None,
            category: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelPurpose {
    Text,
    Audio,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: String,
    pub provider: Option<String>,
}

impl ModelSelection {
    pub fn new(model: impl Into<String>, provider: Option<String>) -> Self {
        Self {
            model: model.into(),
            provider,
        }
    }
}

pub fn default_selection(purpose: ModelPurpose) -> ModelSelection {
    match purpose {
        ModelPurpose::Text => {
            ModelSelection::new(DEFAULT_TEXT_MODEL, Some(DEFAULT_TEXT_PROVIDER.to_string()))
        }
        ModelPurpose::Audio => ModelSelection::new(
            DEFAULT_AUDIO_MODEL,
            Some(DEFAULT_AUDIO_PROVIDER.to_string()),
        ),
        ModelPurpose::Image => ModelSelection::new(
            DEFAULT_IMAGE_MODEL,
            Some(DEFAULT_IMAGE_PROVIDER.to_string()),
        ),
    }
}

/// Applies the requested selection for a purpose, guarding against
/// image-only providers answering text requests.
pub fn resolve_selection(
    requested: Option<ModelSelection>,
    purpose: ModelPurpose,
) -> ModelSelection {
    let selection = requested.unwrap_or_else(|| default_selection(purpose));

    if matches!(purpose, ModelPurpose::Text)
        && let Some(provider) = &selection.provider
        && IMAGE_ONLY_PROVIDERS.contains(&provider.as_str())
    {
        tracing::warn!(
            provider = %provider,
            "provider serves images only; using the default text model instead"
        );
        return default_selection(ModelPurpose::Text);
    }

    selection
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCatalogSource {
    ProviderApi,
    CacheFresh,
    CacheStaleFallback,
    StaticFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub entries: Vec<ModelEntry>,
    pub source: ModelCatalogSource,
    pub warning: Option<String>,
}

impl ModelCatalog {
    pub fn from_provider_api(entries: Vec<ModelEntry>) -> Self {
        Self {
            entries,
            source: ModelCatalogSource::ProviderApi,
            warning: None,
        }
    }

    pub fn from_cache_fresh(entries: Vec<ModelEntry>) -> Self {
        Self {
            entries,
            source: ModelCatalogSource::CacheFresh,
            warning: None,
        }
    }

    pub fn from_cache_stale(entries: Vec<ModelEntry>, warning: String) -> Self {
        Self {
            entries,
            source: ModelCatalogSource::CacheStaleFallback,
            warning: Some(warning),
        }
    }

    pub fn from_static_fallback(entries: Vec<ModelEntry>, warning: String) -> Self {
        Self {
            entries,
            source: ModelCatalogSource::StaticFallback,
            warning: Some(warning),
        }
    }
}

struct CacheEntry {
    entries: Vec<ModelEntry>,
    fetched_at: Instant,
}

/// Catalog cache keyed by endpoint. The listing upstream refreshes daily,
/// so a short TTL only has to absorb bursts of settings-screen opens.
pub struct ModelCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(10 * 60))
    }

    pub async fn get_fresh(&self, endpoint: &str) -> Option<Vec<ModelEntry>> {
        let entries = self.entries.read().await;
        entries.get(endpoint).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.entries.clone())
            } else {
                None
            }
        })
    }

    pub async fn get_any(&self, endpoint: &str) -> Option<Vec<ModelEntry>> {
        let entries = self.entries.read().await;
        entries.get(endpoint).map(|entry| entry.entries.clone())
    }

    pub async fn set(&self, endpoint: &str, models: Vec<ModelEntry>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            endpoint.to_string(),
            CacheEntry {
                entries: models,
                fetched_at: Instant::now(),
            },
        );
    }
}

static MODEL_CACHE: OnceLock<Arc<ModelCache>> = OnceLock::new();

pub fn get_model_cache() -> Arc<ModelCache> {
    MODEL_CACHE
        .get_or_init(|| Arc::new(ModelCache::with_default_ttl()))
        .clone()
}

pub fn default_model_entries() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new(DEFAULT_TEXT_MODEL).with_provider(DEFAULT_TEXT_PROVIDER),
        ModelEntry::new(DEFAULT_AUDIO_MODEL).with_provider(DEFAULT_AUDIO_PROVIDER),
        ModelEntry::new(DEFAULT_IMAGE_MODEL).with_provider(DEFAULT_IMAGE_PROVIDER),
    ]
}
