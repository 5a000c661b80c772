// src/connection/protocol.rs

//! The capability every wire protocol implements to be driven by a `Connection`.

use super::core::Connection;
use crate::core::SandmailError;
use async_trait::async_trait;
use std::sync::Arc;

/// A per-connection protocol state machine.
///
/// Returning an error from either method closes the connection.
#[async_trait]
pub trait Protocol: Send {
    /// Called once, before the first receive (greetings, banners).
    async fn begin(&mut self, connection: &Connection) -> Result<(), SandmailError>;

    /// Consumes one chunk of bytes exactly as it was read from the socket.
    async fn process_incoming_buffer(
        &mut self,
        chunk: &[u8],
        connection: &Connection,
    ) -> Result<(), SandmailError>;
}

/// Builds a fresh protocol instance for every accepted socket.
pub type ProtocolFactory = Arc<dyn Fn() -> Box<dyn Protocol> + Send + Sync>;
