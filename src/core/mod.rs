// src/core/mod.rs

//! The central module containing the shared building blocks of Sandmail:
//! errors, framing, peer events, message sinks, metrics and background tasks.

pub mod errors;
pub mod events;
pub mod framing;
pub mod metrics;
pub mod sink;
pub mod tasks;

pub use errors::SandmailError;
pub use events::{EventBus, EventType, PeerEvent};
pub use framing::LineFramer;
pub use sink::{MessageSink, ReceivedMessage, TextEncoding};
