use std::sync::Arc;

use satsang::{SettingsStore, build_runtime, cli};
use satsang_storage::{FileStore, KeyValueStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open_default());

    let runtime = match build_runtime(settings, store).await {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("satsang: {error}");
            eprintln!(
                "hint: set assistant.api_key in {}",
                SettingsStore::default_config_path().display()
            );
            std::process::exit(1);
        }
    };

    if let Err(error) = cli::run(runtime).await {
        eprintln!("satsang: {error}");
        std::process::exit(1);
    }
}
