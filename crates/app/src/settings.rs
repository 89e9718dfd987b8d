use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use satsang_chat::SessionConfig;
use satsang_llm::{DEFAULT_TEMPERATURE, DEFAULT_TEXT_MODEL, DEFAULT_TEXT_PROVIDER};

pub const SETTINGS_DIRECTORY_NAME: &str = "satsang";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub assistant: AssistantSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantSettings {
    /// Empty means "derive from the backend base URL" (`{base}/api/v1`),
    /// matching the proxy the community backend exposes.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: default_model(),
            provider: default_provider(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl AssistantSettings {
    pub fn resolved_endpoint(&self, backend_base_url: &str) -> String {
        let explicit = self.endpoint.trim();
        if explicit.is_empty() {
            format!("{}/api/v1", backend_base_url.trim().trim_end_matches('/'))
        } else {
            explicit.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_fallback_title")]
    pub fallback_title: String,
    #[serde(default = "default_error_label")]
    pub error_label: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            fallback_title: default_fallback_title(),
            error_label: default_error_label(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl AppSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            greeting: self.session.greeting.clone(),
            fallback_title: self.session.fallback_title.clone(),
            system_prompt: self.assistant.system_prompt.clone(),
            error_label: self.session.error_label.clone(),
            debounce: Duration::from_millis(self.session.debounce_ms),
        }
    }
}

fn default_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}

fn default_provider() -> String {
    DEFAULT_TEXT_PROVIDER.to_string()
}

fn default_system_prompt() -> String {
    SessionConfig::default().system_prompt
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_base_url() -> String {
    satsang_backend::DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    180
}

fn default_greeting() -> String {
    SessionConfig::default().greeting
}

fn default_fallback_title() -> String {
    SessionConfig::default().fallback_title
}

fn default_error_label() -> String {
    SessionConfig::default().error_label
}

fn default_debounce_ms() -> u64 {
    1000
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace settings file {to:?} with {from:?}"))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// Settings behind an `ArcSwap` for cheap shared reads. Loading merges the
/// defaults with an optional JSON file; an unreadable file falls back to
/// defaults with a warning rather than refusing to start.
pub struct SettingsStore {
    settings: Arc<ArcSwap<AppSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".satsang"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: AppSettings) -> Result<(), SettingsError> {
        self.persist(&settings)?;
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> AppSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return AppSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(AppSettings::default())).merge(Json::file(path));

        match figment.extract::<AppSettings>() {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                AppSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_the_assistant_endpoint_from_the_backend() {
        let settings = AppSettings::default();
        assert_eq!(
            settings.assistant.resolved_endpoint(&settings.backend.base_url),
            "http://localhost:8081/api/v1"
        );
    }

    #[test]
    fn explicit_endpoint_wins_over_derivation() {
        let mut settings = AppSettings::default();
        settings.assistant.endpoint = "https://proxy.example.org/v1".to_string();
        assert_eq!(
            settings.assistant.resolved_endpoint(&settings.backend.base_url),
            "https://proxy.example.org/v1"
        );
    }

    #[test]
    fn session_config_carries_the_configured_debounce() {
        let mut settings = AppSettings::default();
        settings.session.debounce_ms = 250;
        let config = settings.to_session_config();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.system_prompt, settings.assistant.system_prompt);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(*store.settings(), AppSettings::default());
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"assistant": {"api_key": "sk-test"}, "backend": {"base_url": "http://temple:9000"}}"#,
        )
        .expect("write");

        let store = SettingsStore::new(path);
        let settings = store.settings();
        assert_eq!(settings.assistant.api_key, "sk-test");
        assert_eq!(settings.assistant.model, DEFAULT_TEXT_MODEL);
        assert_eq!(settings.backend.base_url, "http://temple:9000");
        assert_eq!(settings.session.debounce_ms, 1000);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{broken").expect("write");
        let store = SettingsStore::new(path);
        assert_eq!(*store.settings(), AppSettings::default());
    }

    #[test]
    fn update_persists_and_swaps() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone());

        let mut settings = AppSettings::default();
        settings.assistant.api_key = "sk-live".to_string();
        store.update(settings.clone()).expect("update");

        assert_eq!(*store.settings(), settings);
        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.settings().assistant.api_key, "sk-live");
        assert!(!dir.path().join("settings.json.tmp").exists());
    }
}
