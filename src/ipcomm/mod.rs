// src/ipcomm/mod.rs

//! IPComm, the private line + JSON control protocol spoken between the UI
//! process and the background service.

pub mod client;
pub mod forwarder;
pub mod protocol;
pub mod request;

pub use client::IpCommClient;
pub use forwarder::PeerForwarder;
pub use protocol::IpCommProtocol;
pub use request::{ACK, CommandType, IpCommRequest, MAGIC};

use crate::connection::{Protocol, ProtocolFactory};
use crate::core::events::EventBus;
use std::sync::Arc;

/// Builds a factory that hands every accepted peer socket a fresh `IpCommProtocol`.
pub fn protocol_factory(bus: Arc<EventBus>, max_payload_bytes: usize) -> ProtocolFactory {
    Arc::new(move || -> Box<dyn Protocol> {
        Box::new(IpCommProtocol::new(bus.clone(), max_payload_bytes))
    })
}
