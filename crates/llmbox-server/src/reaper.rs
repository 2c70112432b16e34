//! Periodic eviction of expired sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::SessionStore;

/// Sweep `store` every `interval` until `cancel` fires.
///
/// Lookups already evict lazily; the sweep only bounds how long an
/// abandoned session can hold its engine.
pub fn spawn_reaper(
    store: Arc<SessionStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = store.sweep_expired();
                    if evicted > 0 {
                        debug!(evicted, remaining = store.len(), "reaper sweep");
                    }
                }
                () = cancel.cancelled() => {
                    info!("reaper stopped");
                    break;
                }
            }
        }
    })
}
