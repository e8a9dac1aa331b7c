//! Periodic reclamation of idle filters.
//!
//! Eager deletion on the last detach handles the common case; this task
//! catches filters that were created and never attached to, and filters
//! emptied by dead-peer cleanup.

use super::registry::SubscriptionManager;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Handle to the running sweep task.
pub struct Reaper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Spawn the sweep loop.
    pub fn spawn(manager: Arc<SubscriptionManager>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // sweep happens one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = manager.reap_idle(Utc::now()).await;
                        if reaped > 0 {
                            info!(reaped, "periodic cleanup removed stale filters");
                        } else {
                            debug!("periodic cleanup found nothing to remove");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });
        info!(interval_secs = interval.as_secs(), "started periodic filter cleanup");
        Self { stop, handle }
    }

    /// Stop the sweep and wait for the task to drain.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
        info!("stopped periodic filter cleanup");
    }
}
