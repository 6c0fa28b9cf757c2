//! Background removal of expired verification tokens.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::AccountService;

/// Spawn a task purging expired tokens every `every`.
///
/// Expired tokens are already rejected on use, so this only reclaims rows.
pub fn spawn(service: Arc<AccountService>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(err) = service.purge_expired_tokens().await {
                tracing::warn!(error = %err, "failed to purge expired tokens");
            }
        }
    })
}
