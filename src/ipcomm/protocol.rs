// src/ipcomm/protocol.rs

//! The responder side of IPComm.
//!
//! One connection may carry any number of sequential requests. Each request
//! runs `MAGIC` -> `MAGIC`, header -> `ACK`, payload -> (reply for Exchange).
//! A wrong token or a malformed header ends the connection before anything is
//! dispatched to the bus.

use super::request::{ACK, CommandType, IpCommRequest, MAGIC};
use crate::connection::{Connection, Protocol};
use crate::core::SandmailError;
use crate::core::events::{EventBus, PeerEvent};
use crate::core::framing::LineFramer;
use crate::core::metrics;
use crate::core::sink::TextEncoding;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
enum IpCommState {
    AwaitMagic,
    AwaitRequest,
    AwaitPayload(IpCommRequest),
}

pub struct IpCommProtocol {
    bus: Arc<EventBus>,
    max_payload_bytes: usize,
    framer: LineFramer,
    state: IpCommState,
}

impl IpCommProtocol {
    pub fn new(bus: Arc<EventBus>, max_payload_bytes: usize) -> Self {
        Self {
            bus,
            max_payload_bytes,
            framer: LineFramer::new(),
            state: IpCommState::AwaitMagic,
        }
    }

    /// Decodes a payload, runs it through the bus and, for an exchange,
    /// returns the reply line.
    async fn dispatch(
        &self,
        request: &IpCommRequest,
        payload: &[u8],
    ) -> Result<Option<String>, SandmailError> {
        let event = PeerEvent::decode(request.event_type, payload)?;
        debug!(
            "IPComm {} of {} event ({} bytes).",
            request.command_type, request.event_type, request.byte_size
        );
        let handled = self.bus.publish(event).await;
        metrics::IPCOMM_REQUESTS_TOTAL.inc();

        match request.command_type {
            CommandType::Publish => Ok(None),
            CommandType::Exchange => {
                let reply = handled.encode_payload()?;
                Ok(Some(String::from_utf8(reply)?))
            }
        }
    }
}

#[async_trait]
impl Protocol for IpCommProtocol {
    async fn begin(&mut self, connection: &Connection) -> Result<(), SandmailError> {
        debug!("IPComm peer {} connected from {}.", connection.id(), connection.peer_addr());
        // Headers and payloads are UTF-8 JSON.
        connection.set_encoding(TextEncoding::Utf8);
        connection.send_line(MAGIC).await
    }

    async fn process_incoming_buffer(
        &mut self,
        chunk: &[u8],
        connection: &Connection,
    ) -> Result<(), SandmailError> {
        self.framer.append(chunk);

        loop {
            match std::mem::replace(&mut self.state, IpCommState::AwaitMagic) {
                IpCommState::AwaitMagic => {
                    let Some(line) = self.framer.try_take_line() else {
                        return Ok(());
                    };
                    if &line[..] != MAGIC.as_bytes() {
                        return Err(SandmailError::Handshake(format!(
                            "unexpected token '{}'",
                            String::from_utf8_lossy(&line)
                        )));
                    }
                    connection.send_line(MAGIC).await?;
                    self.state = IpCommState::AwaitRequest;
                }
                IpCommState::AwaitRequest => {
                    let Some(line) = self.framer.try_take_line() else {
                        self.state = IpCommState::AwaitRequest;
                        return Ok(());
                    };
                    let request = IpCommRequest::parse(&String::from_utf8_lossy(&line))?;
                    if request.byte_size > self.max_payload_bytes {
                        return Err(SandmailError::InvalidRequest(format!(
                            "payload of {} bytes exceeds the {} byte limit",
                            request.byte_size, self.max_payload_bytes
                        )));
                    }
                    connection.send_line(ACK).await?;
                    self.state = IpCommState::AwaitPayload(request);
                }
                IpCommState::AwaitPayload(request) => {
                    let Some(payload) = self.framer.try_take_bytes(request.byte_size) else {
                        self.state = IpCommState::AwaitPayload(request);
                        return Ok(());
                    };
                    if let Some(reply) = self.dispatch(&request, &payload).await? {
                        connection.send_line(&reply).await?;
                    }
                }
            }
        }
    }
}
