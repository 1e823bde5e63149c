//! Background expiry of idle sessions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionStore;

/// Spawn a task that calls [`SessionStore::expire_older_than`] every
/// `interval` until `shutdown` is cancelled.
///
/// The first sweep happens one full `interval` after spawning.
pub fn spawn_expiry_sweeper(
    store: SessionStore,
    timeout: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!(
        timeout_secs = timeout.as_secs(),
        interval_secs = interval.as_secs(),
        "Session expiry sweeper scheduled"
    );

    tokio::spawn(async move {
        let Some(first_tick) = tokio::time::Instant::now().checked_add(interval) else {
            warn!(
                interval_secs = interval.as_secs(),
                "Sweep interval out of range, session expiry disabled"
            );
            return;
        };
        let mut ticker = tokio::time::interval_at(first_tick, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Session expiry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = store.expire_older_than(timeout);
                    debug!(removed, "Session expiry sweep finished");
                }
            }
        }
    })
}
