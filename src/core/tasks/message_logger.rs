// src/core/tasks/message_logger.rs

use crate::core::events::{EventBus, PeerEvent};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Logs every `NewMessage` event seen on the local bus.
pub struct MessageLoggerTask {
    bus: Arc<EventBus>,
}

impl MessageLoggerTask {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut events = self.bus.subscribe();
        loop {
            tokio::select! {
                result = events.recv() => match result {
                    Ok(PeerEvent::NewMessage(message)) => info!(
                        "New message from <{}> to {} ({} bytes, received {}).",
                        message.mail_from,
                        message.recipients.join(", "),
                        message.size,
                        message.received_at.to_rfc3339()
                    ),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Message logger lagged behind; {} event(s) skipped.", skipped);
                    }
                    Err(RecvError::Closed) => return,
                },
                _ = shutdown_rx.recv() => return,
            }
        }
    }
}
