// src/ipcomm/forwarder.rs

use super::client::IpCommClient;
use crate::core::events::{EventBus, EventType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

/// Relays selected local bus events to a peer process and keeps the client's
/// connection pool trimmed.
pub struct PeerForwarder {
    bus: Arc<EventBus>,
    client: Arc<IpCommClient>,
    event_types: Vec<EventType>,
    timeout: Duration,
    reap_interval: Duration,
    max_idle: Duration,
}

impl PeerForwarder {
    pub fn new(
        bus: Arc<EventBus>,
        client: Arc<IpCommClient>,
        event_types: Vec<EventType>,
        timeout: Duration,
    ) -> Self {
        Self {
            bus,
            client,
            event_types,
            timeout,
            reap_interval: Duration::from_secs(5 * 60),
            max_idle: Duration::from_secs(20 * 60),
        }
    }

    /// Sets how often and after how much inactivity pooled connections are dropped.
    pub fn with_reaping(mut self, reap_interval: Duration, max_idle: Duration) -> Self {
        self.reap_interval = reap_interval.max(Duration::from_millis(1));
        self.max_idle = max_idle;
        self
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Forwarding {:?} events to {}.",
            self.event_types,
            self.client.endpoint()
        );
        let mut events = self.bus.subscribe();
        let mut reap = interval_at(Instant::now() + self.reap_interval, self.reap_interval);

        loop {
            tokio::select! {
                result = events.recv() => match result {
                    Ok(event) => {
                        if !self.event_types.contains(&event.event_type()) {
                            continue;
                        }
                        if !self.client.publish(&event, self.timeout).await {
                            debug!(
                                "No listener at {} for {} event; dropped.",
                                self.client.endpoint(),
                                event.event_type()
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Peer forwarder lagged behind; {} event(s) were not forwarded.", skipped);
                    }
                    Err(RecvError::Closed) => return,
                },
                _ = reap.tick() => {
                    let dropped = self.client.reap_idle(self.max_idle);
                    if dropped > 0 {
                        debug!("Dropped {} idle pooled connection(s) to {}.", dropped, self.client.endpoint());
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Peer forwarder shutting down.");
                    return;
                }
            }
        }
    }
}
