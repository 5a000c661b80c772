// src/core/sink.rs

//! The hand-off point between the SMTP engine and whatever consumes captured
//! mail. The SMTP layer only ever sees the `MessageSink` trait.

use crate::core::events::{EventBus, NewMessageEvent, PeerEvent};
use crate::core::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The text encoding negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// 7-bit text; bytes outside ASCII decode to `?`.
    #[default]
    Ascii,
    Utf8,
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
        }
    }
}

/// A message captured by a completed DATA command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub mail_from: String,
    pub recipients: Vec<String>,
    /// The unstuffed message text, lines joined with CRLF.
    pub raw: String,
    pub encoding: TextEncoding,
    pub received_at: DateTime<Utc>,
}

/// Consumes captured messages. Invoked once per completed DATA.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn handle_received(&self, message: ReceivedMessage);
}

/// Forwards every message into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ReceivedMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReceivedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn handle_received(&self, message: ReceivedMessage) {
        if self.tx.send(message).is_err() {
            warn!("Message receiver dropped; captured message discarded.");
        }
    }
}

/// Logs every message and announces it on the event bus as `NewMessage`.
#[derive(Debug, Clone)]
pub struct BusSink {
    bus: Arc<EventBus>,
}

impl BusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl MessageSink for BusSink {
    async fn handle_received(&self, message: ReceivedMessage) {
        metrics::MESSAGES_RECEIVED_TOTAL.inc();
        info!(
            "Captured message from <{}> for {} recipient(s), {} bytes.",
            message.mail_from,
            message.recipients.len(),
            message.raw.len()
        );
        let event = PeerEvent::NewMessage(NewMessageEvent {
            mail_from: message.mail_from,
            recipients: message.recipients,
            size: message.raw.len(),
            received_at: message.received_at,
        });
        self.bus.publish(event).await;
    }
}
