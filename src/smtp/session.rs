// src/smtp/session.rs

/// Per-connection SMTP state, exclusively owned by one connection's protocol.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SmtpSession {
    /// The domain the client declared with HELO/EHLO.
    pub sender: Option<String>,
    pub mail_from: Option<String>,
    /// Recipients in the order they were accepted, without duplicates.
    pub recipients: Vec<String>,
    pub use_utf8: bool,
}

impl SmtpSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the mail transaction but keeps the HELO/EHLO identity, so a new
    /// MAIL may follow on the same connection.
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.use_utf8 = false;
    }

    /// Adds a recipient unless the exact same address is already present.
    /// Returns whether it was added.
    pub fn add_recipient(&mut self, address: &str) -> bool {
        if self.recipients.iter().any(|r| r == address) {
            return false;
        }
        self.recipients.push(address.to_string());
        true
    }

    pub fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    pub fn has_mail_from(&self) -> bool {
        self.mail_from.is_some()
    }

    /// True once HELO, MAIL and at least one RCPT have succeeded.
    pub fn ready_for_data(&self) -> bool {
        self.has_sender() && self.has_mail_from() && !self.recipients.is_empty()
    }
}
