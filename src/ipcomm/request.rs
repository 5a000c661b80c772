// src/ipcomm/request.rs

//! The IPComm request header and the fixed handshake lines.

use crate::core::SandmailError;
use crate::core::events::{EventType, PeerEvent};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// The handshake token: the product name, upper-cased.
pub const MAGIC: &str = "SANDMAIL";
/// Sent by the responder once a request header has been accepted.
pub const ACK: &str = "ACK";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum CommandType {
    /// Deliver the event; nothing is sent back.
    Publish,
    /// Deliver the event and read back the reply event of the same type.
    Exchange,
}

/// The JSON line announcing the payload that follows it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct IpCommRequest {
    pub command_type: CommandType,
    #[serde(rename = "Type")]
    pub event_type: EventType,
    pub byte_size: usize,
}

impl IpCommRequest {
    /// Builds the header for `event` and returns it with the encoded payload.
    pub fn for_event(
        command_type: CommandType,
        event: &PeerEvent,
    ) -> Result<(Self, Vec<u8>), SandmailError> {
        let payload = event.encode_payload()?;
        let request = Self {
            command_type,
            event_type: event.event_type(),
            byte_size: payload.len(),
        };
        Ok((request, payload))
    }

    pub fn to_line(&self) -> Result<String, SandmailError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a header line. Unknown event tags are reported separately from
    /// malformed JSON.
    pub fn parse(line: &str) -> Result<Self, SandmailError> {
        let value: serde_json::Value = serde_json::from_str(line.trim())?;
        if let Some(tag) = value.get("Type").and_then(|t| t.as_str())
            && !EventType::iter().any(|known| known.to_string() == tag)
        {
            return Err(SandmailError::UnknownEventType(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}
