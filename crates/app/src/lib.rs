pub mod bootstrap;
pub mod cli;
pub mod settings;

pub use bootstrap::{AppRuntime, BootstrapError, build_runtime};
pub use settings::{AppSettings, SettingsError, SettingsStore};
