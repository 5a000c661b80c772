// src/core/tasks/status_logger.rs

use crate::connection::ConnectionManager;
use crate::core::metrics::MetricsSnapshot;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio::time::{Instant, interval_at};
use tracing::info;

/// Emits a periodic status line with the live connection count, the
/// process-wide counters and the resident memory of the process.
pub struct StatusLoggerTask {
    manager: Arc<ConnectionManager>,
    period: Duration,
    system: System,
}

impl StatusLoggerTask {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            period: manager.settings().status_interval.max(Duration::from_millis(1)),
            manager,
            system: System::new(),
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);

        loop {
            tokio::select! {
                _ = interval.tick() => self.log_status(),
                _ = shutdown_rx.recv() => return,
            }
        }
    }

    fn log_status(&mut self) {
        let memory = match self.process_memory() {
            Some(bytes) => format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0),
            None => "unknown".to_string(),
        };
        info!(
            "[{}] Status: {} active connection(s) here; {}; memory {}.",
            self.manager.name(),
            self.manager.count(),
            MetricsSnapshot::capture(),
            memory
        );
    }

    fn process_memory(&mut self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).map(|process| process.memory())
    }
}
