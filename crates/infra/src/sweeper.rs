//! Background purge of expired and revoked sessions, off the request path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::SessionStore;

/// Shortest accepted sweep period; smaller values are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to control and join the sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the task to stop.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "session sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[derive(Debug)]
pub struct SessionSweeper;

impl SessionSweeper {
    /// Spawn a task running `purge_expired` every `interval`.
    ///
    /// The first sweep happens one interval after spawning. Intervals below
    /// [`MIN_SWEEP_INTERVAL`] are raised to it. Must be called from within a
    /// tokio runtime.
    pub fn spawn(store: Arc<dyn SessionStore>, interval: Duration) -> SweeperHandle {
        let interval = if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "sweep interval too short, using the minimum"
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(sweep_loop(store, interval, shutdown_rx));
        SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn sweep_loop(store: Arc<dyn SessionStore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "session sweeper started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match store.purge_expired(Utc::now()).await {
                    Ok(0) => debug!("no expired sessions to purge"),
                    Ok(purged) => info!(purged, "purged expired sessions"),
                    Err(err) => warn!(error = %err, "session purge failed"),
                }
            }
        }
    }

    info!("session sweeper stopped");
}
