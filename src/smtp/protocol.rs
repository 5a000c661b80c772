// src/smtp/protocol.rs

//! `SmtpProtocol`, the per-connection SMTP session state machine.
//!
//! The line handling is kept free of I/O: `handle_line` consumes one decoded
//! line and returns the replies, an optional captured message and whether to
//! close. The `Protocol` implementation feeds it from the connection's framer
//! and performs the side effects in order: deliver to the sink, then reply.

use super::commands::{
    self, NextState, PROMPT_PASSWORD, REPLY_AUTH_CANCELLED, REPLY_AUTH_FAILED,
    REPLY_LINE_TOO_LONG, REPLY_OK, SmtpIdentity,
};
use super::session::SmtpSession;
use crate::connection::{Connection, Protocol};
use crate::core::framing::LineFramer;
use crate::core::sink::{MessageSink, ReceivedMessage, TextEncoding};
use crate::core::SandmailError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
enum SmtpState {
    Greeting,
    Command,
    DataCapture(Vec<String>),
    AuthPlain,
    AuthLoginUsername,
    AuthLoginPassword { username_ok: bool },
    Closed,
}

/// The effects of one processed line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SmtpStep {
    pub replies: Vec<String>,
    /// Set when the line terminated a DATA body.
    pub delivery: Option<ReceivedMessage>,
    pub close: bool,
}

impl SmtpStep {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            replies: vec![line.into()],
            ..Default::default()
        }
    }
}

pub struct SmtpProtocol {
    identity: SmtpIdentity,
    sink: Arc<dyn MessageSink>,
    max_line_length: usize,
    framer: LineFramer,
    session: SmtpSession,
    state: SmtpState,
}

impl SmtpProtocol {
    pub fn new(hostname: impl Into<String>, sink: Arc<dyn MessageSink>, max_line_length: usize) -> Self {
        Self {
            identity: SmtpIdentity::new(hostname),
            sink,
            max_line_length,
            framer: LineFramer::new(),
            session: SmtpSession::new(),
            state: SmtpState::Greeting,
        }
    }

    /// Controls whether EHLO lists `AUTH PLAIN LOGIN`.
    pub fn with_auth_advertised(mut self, advertise_auth: bool) -> Self {
        self.identity.advertise_auth = advertise_auth;
        self
    }

    pub fn session(&self) -> &SmtpSession {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.state == SmtpState::Closed
    }

    /// The negotiated encoding of the current transaction.
    pub fn encoding(&self) -> TextEncoding {
        if self.session.use_utf8 {
            TextEncoding::Utf8
        } else {
            TextEncoding::Ascii
        }
    }

    /// Returns the banner line and moves to command state.
    pub fn greeting(&mut self) -> String {
        self.state = SmtpState::Command;
        format!("220 {} SMTP ready", self.identity.hostname)
    }

    /// Turns raw line bytes into text. Only body lines are bound by the
    /// negotiated encoding; command and AUTH lines are read as UTF-8, which
    /// leaves plain ASCII untouched and lets a `SMTPUTF8` MAIL line keep its
    /// address.
    pub fn decode_line(&self, raw: &[u8]) -> String {
        match self.state {
            SmtpState::DataCapture(_) => self.encoding().decode(raw),
            _ => TextEncoding::Utf8.decode(raw),
        }
    }

    /// Processes one line received from the client.
    pub fn handle_line(&mut self, line: &str) -> SmtpStep {
        match std::mem::replace(&mut self.state, SmtpState::Command) {
            SmtpState::Greeting | SmtpState::Command => self.handle_command(line),
            SmtpState::DataCapture(mut lines) => {
                if line == "." {
                    let message = ReceivedMessage {
                        mail_from: self.session.mail_from.clone().unwrap_or_default(),
                        recipients: self.session.recipients.clone(),
                        raw: lines.join("\r\n"),
                        encoding: self.encoding(),
                        received_at: Utc::now(),
                    };
                    self.session.reset();
                    return SmtpStep {
                        replies: vec![REPLY_OK.to_string()],
                        delivery: Some(message),
                        close: false,
                    };
                }
                lines.push(unstuff(line).to_string());
                self.state = SmtpState::DataCapture(lines);
                SmtpStep::default()
            }
            SmtpState::AuthPlain => {
                if commands::is_auth_cancel(line) {
                    return SmtpStep::reply(REPLY_AUTH_CANCELLED);
                }
                SmtpStep::reply(commands::auth_reply(commands::check_plain(line)))
            }
            SmtpState::AuthLoginUsername => {
                if commands::is_auth_cancel(line) {
                    return SmtpStep::reply(REPLY_AUTH_CANCELLED);
                }
                self.state = SmtpState::AuthLoginPassword {
                    username_ok: commands::decode_login_username(line).is_some(),
                };
                SmtpStep::reply(PROMPT_PASSWORD)
            }
            SmtpState::AuthLoginPassword { username_ok } => {
                if commands::is_auth_cancel(line) {
                    return SmtpStep::reply(REPLY_AUTH_CANCELLED);
                }
                if username_ok {
                    SmtpStep::reply(commands::auth_reply(commands::check_login_password(line)))
                } else {
                    SmtpStep::reply(REPLY_AUTH_FAILED)
                }
            }
            SmtpState::Closed => {
                self.state = SmtpState::Closed;
                SmtpStep::default()
            }
        }
    }

    fn handle_command(&mut self, line: &str) -> SmtpStep {
        if line.len() > self.max_line_length {
            return SmtpStep::reply(REPLY_LINE_TOO_LONG);
        }

        let result = commands::dispatch(line, &mut self.session, &self.identity);
        let mut step = SmtpStep {
            replies: result.replies,
            ..Default::default()
        };
        self.state = match result.next {
            NextState::Continue => SmtpState::Command,
            NextState::BeginData => SmtpState::DataCapture(Vec::new()),
            NextState::AwaitAuthPlain => SmtpState::AuthPlain,
            NextState::AwaitLoginUsername => SmtpState::AuthLoginUsername,
            NextState::AwaitLoginPassword { username_ok } => {
                SmtpState::AuthLoginPassword { username_ok }
            }
            NextState::Close => {
                step.close = true;
                SmtpState::Closed
            }
        };
        step
    }
}

/// Reverses SMTP dot-stuffing for one body line.
pub fn unstuff(line: &str) -> &str {
    if line.len() > 1 && line.starts_with('.') {
        &line[1..]
    } else {
        line
    }
}

#[async_trait]
impl Protocol for SmtpProtocol {
    async fn begin(&mut self, connection: &Connection) -> Result<(), SandmailError> {
        info!("SMTP session {} opened from {}.", connection.id(), connection.peer_addr());
        let banner = self.greeting();
        connection.send_line(&banner).await
    }

    async fn process_incoming_buffer(
        &mut self,
        chunk: &[u8],
        connection: &Connection,
    ) -> Result<(), SandmailError> {
        self.framer.append(chunk);

        while let Some(raw) = self.framer.try_take_line() {
            let line = self.decode_line(&raw);
            debug!("Connection {} << {}", connection.id(), line);

            let step = self.handle_line(&line);
            if let Some(message) = step.delivery {
                self.sink.handle_received(message).await;
            }
            connection.set_encoding(self.encoding());

            for reply in &step.replies {
                connection.send_line(reply).await?;
            }
            if step.close {
                info!("SMTP session {} ended by client.", connection.id());
                connection.close(true).await;
                self.framer.clear();
                return Ok(());
            }
        }
        Ok(())
    }
}
