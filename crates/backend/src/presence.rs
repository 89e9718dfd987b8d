use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::BackendClient;
use crate::models::UserId;

pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(180);

/// Reports the user as online every `period` until the task is aborted.
/// The interval's immediate first tick is skipped, so the first beat lands
/// one period after spawn.
pub fn spawn_heartbeat(
    client: Arc<BackendClient>,
    user: UserId,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match client.heartbeat(user).await {
                Ok(()) => debug!(user = %user, "presence heartbeat sent"),
                Err(error) => warn!(user = %user, error = %error, "presence heartbeat failed"),
            }
        }
    })
}
