// src/core/tasks/idle_reaper.rs

use crate::connection::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

/// Periodically closes connections that have been silent for longer than the
/// configured idle timeout.
pub struct IdleReaperTask {
    manager: Arc<ConnectionManager>,
    idle_timeout: Duration,
    period: Duration,
}

impl IdleReaperTask {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        let settings = manager.settings();
        Self {
            idle_timeout: settings.idle_timeout,
            period: settings.sweep_interval.max(Duration::from_millis(1)),
            manager,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "[{}] Idle connection reaper started. Timeout: {:?}, check interval: {:?}",
            self.manager.name(),
            self.idle_timeout,
            self.period
        );
        let mut interval = interval_at(Instant::now() + self.period, self.period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = self.manager.reap_idle(self.idle_timeout).await;
                    if reaped > 0 {
                        debug!(
                            "[{}] Idle reaper closed {} connection(s).",
                            self.manager.name(),
                            reaped
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("[{}] Idle connection reaper shutting down.", self.manager.name());
                    return;
                }
            }
        }
    }
}
