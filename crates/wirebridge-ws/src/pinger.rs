//! Idle-connection pinger.
//!
//! Every `interval` the pinger walks the registry and sends a Ping to each
//! connection that has not written anything for at least `interval`. The
//! next sweep is scheduled only after the current one finishes, so a slow
//! send can delay sweeps but never overlap them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;
use crate::telemetry;

/// Sends keep-alive pings to idle connections.
#[derive(Debug, Clone)]
pub struct IdlePinger {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl IdlePinger {
    /// Create a pinger over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// The sweep interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ping every connection idle for at least the interval.
    ///
    /// A connection whose ping cannot be written is closed and removed.
    /// Returns the number of pings sent.
    pub async fn sweep(&self) -> usize {
        let mut sent = 0;
        for handle in self.registry.handles() {
            let id = handle.id();
            if handle.is_closed() {
                self.registry.remove(&id);
                continue;
            }
            if handle.flags().close_initiated() || handle.idle_duration() < self.interval {
                continue;
            }

            match handle.ping().await {
                Ok(()) => {
                    sent += 1;
                    telemetry::record_ping_sent();
                    debug!(connection_id = %id, "Sent idle ping");
                }
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Idle ping failed, closing connection");
                    handle.close().await;
                    self.registry.remove(&id);
                }
            }
        }
        sent
    }

    /// Run sweeps on a background task until the handle is stopped.
    pub fn spawn(self) -> IdlePingerHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Idle pinger started");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(self.interval) => {
                        let sent = self.sweep().await;
                        if sent > 0 {
                            debug!(pings = sent, "Idle sweep complete");
                        }
                    }
                    _ = stop_rx.recv() => {
                        info!("Idle pinger received shutdown signal");
                        break;
                    }
                }
            }
        });

        IdlePingerHandle { stop_tx, join }
    }
}

/// Handle to a running [`IdlePinger`].
#[derive(Debug)]
pub struct IdlePingerHandle {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl IdlePingerHandle {
    /// Stop the pinger and wait for its task to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.join.await;
    }

    /// Whether the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
