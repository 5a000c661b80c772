// src/core/events.rs

//! Defines the events exchanged between the cooperating Sandmail processes and
//! the in-process event bus that delivers them to local handlers.
//!
//! Every event carries an explicit `EventType` tag. The wire protocol sends the
//! tag in the request header and the JSON payload separately, and
//! `PeerEvent::decode` maps the tag back to the concrete payload shape.

use crate::core::SandmailError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::debug;

/// The capacity of the broadcast channel feeding bus subscribers.
const BUS_CAPACITY: usize = 256;

/// The type tag identifying an event's payload shape.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
pub enum EventType {
    AppProcessExchange,
    SmtpServerBind,
    NewMessage,
}

/// Sent by a starting UI process; the service answers with the address its
/// SMTP listener is bound to.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct AppProcessExchangeEvent {
    #[serde(default)]
    pub message_write_location: Option<String>,
    #[serde(default)]
    pub smtp_listen_ip: Option<String>,
    #[serde(default)]
    pub smtp_listen_port: Option<u16>,
}

/// Asks the receiving process to rebind its SMTP listener.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SmtpServerBindEvent {
    pub ip: String,
    pub port: u16,
}

/// Announces a message captured by the SMTP listener.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct NewMessageEvent {
    pub mail_from: String,
    pub recipients: Vec<String>,
    pub size: usize,
    pub received_at: DateTime<Utc>,
}

/// An event that can travel over IPComm or through the local bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    AppProcessExchange(AppProcessExchangeEvent),
    SmtpServerBind(SmtpServerBindEvent),
    NewMessage(NewMessageEvent),
}

impl PeerEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            PeerEvent::AppProcessExchange(_) => EventType::AppProcessExchange,
            PeerEvent::SmtpServerBind(_) => EventType::SmtpServerBind,
            PeerEvent::NewMessage(_) => EventType::NewMessage,
        }
    }

    /// Serializes only the payload; the tag travels separately.
    pub fn encode_payload(&self) -> Result<Vec<u8>, SandmailError> {
        let bytes = match self {
            PeerEvent::AppProcessExchange(e) => serde_json::to_vec(e)?,
            PeerEvent::SmtpServerBind(e) => serde_json::to_vec(e)?,
            PeerEvent::NewMessage(e) => serde_json::to_vec(e)?,
        };
        Ok(bytes)
    }

    /// Rebuilds an event from its tag and JSON payload.
    pub fn decode(event_type: EventType, payload: &[u8]) -> Result<Self, SandmailError> {
        let event = match event_type {
            EventType::AppProcessExchange => {
                PeerEvent::AppProcessExchange(serde_json::from_slice(payload)?)
            }
            EventType::SmtpServerBind => PeerEvent::SmtpServerBind(serde_json::from_slice(payload)?),
            EventType::NewMessage => PeerEvent::NewMessage(serde_json::from_slice(payload)?),
        };
        Ok(event)
    }
}

/// A local consumer of bus events. Handlers run in registration order and may
/// modify the event; the modified event is what an exchange sends back.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &mut PeerEvent);
}

/// The in-process event bus.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    sender: Sender<PeerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            handlers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().push(handler);
    }

    /// Returns a receiver for every event published after this call.
    pub fn subscribe(&self) -> Receiver<PeerEvent> {
        self.sender.subscribe()
    }

    /// Runs all handlers over the event, broadcasts it, and returns the event
    /// as the handlers left it.
    pub async fn publish(&self, mut event: PeerEvent) -> PeerEvent {
        let handlers: Vec<Arc<dyn EventHandler>> = self.handlers.read().clone();
        for handler in handlers {
            handler.handle(&mut event).await;
        }

        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        debug!(
            "Published {} event to {} subscribers.",
            event.event_type(),
            receivers
        );
        event
    }

    /// Publishes on a detached task.
    pub fn publish_async(self: &Arc<Self>, event: PeerEvent) {
        let bus = self.clone();
        tokio::spawn(async move {
            bus.publish(event).await;
        });
    }
}
