// src/smtp/mod.rs

//! The SMTP receiving engine: session state, the command table and the
//! protocol state machine driven by a `Connection`.

pub mod commands;
pub mod protocol;
pub mod session;

pub use protocol::SmtpProtocol;
pub use session::SmtpSession;

use crate::config::SmtpConfig;
use crate::connection::{Protocol, ProtocolFactory};
use crate::core::sink::MessageSink;
use std::sync::Arc;

/// Builds a factory that hands every accepted socket a fresh `SmtpProtocol`.
pub fn protocol_factory(config: &SmtpConfig, sink: Arc<dyn MessageSink>) -> ProtocolFactory {
    let hostname = config.hostname.clone();
    let max_line_length = config.max_line_length;
    let advertise_auth = config.advertise_auth;
    Arc::new(move || -> Box<dyn Protocol> {
        Box::new(
            SmtpProtocol::new(hostname.clone(), sink.clone(), max_line_length)
                .with_auth_advertised(advertise_auth),
        )
    })
}
