// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
#[derive(Error, Debug)]
pub enum SandmailError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Operation timed out")]
    Timeout,

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// `std::io::Error` is not cloneable, so the Io variant shares it behind an Arc.
impl Clone for SandmailError {
    fn clone(&self) -> Self {
        match self {
            SandmailError::Io(e) => SandmailError::Io(Arc::clone(e)),
            SandmailError::Json(s) => SandmailError::Json(s.clone()),
            SandmailError::InvalidRequest(s) => SandmailError::InvalidRequest(s.clone()),
            SandmailError::UnknownEventType(s) => SandmailError::UnknownEventType(s.clone()),
            SandmailError::Handshake(s) => SandmailError::Handshake(s.clone()),
            SandmailError::ConnectionClosed => SandmailError::ConnectionClosed,
            SandmailError::Timeout => SandmailError::Timeout,
            SandmailError::Listener(s) => SandmailError::Listener(s.clone()),
            SandmailError::Internal(s) => SandmailError::Internal(s.clone()),
        }
    }
}

impl PartialEq for SandmailError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SandmailError::Io(e1), SandmailError::Io(e2)) => e1.to_string() == e2.to_string(),
            (SandmailError::Json(s1), SandmailError::Json(s2)) => s1 == s2,
            (SandmailError::InvalidRequest(s1), SandmailError::InvalidRequest(s2)) => s1 == s2,
            (SandmailError::UnknownEventType(s1), SandmailError::UnknownEventType(s2)) => {
                s1 == s2
            }
            (SandmailError::Handshake(s1), SandmailError::Handshake(s2)) => s1 == s2,
            (SandmailError::Listener(s1), SandmailError::Listener(s2)) => s1 == s2,
            (SandmailError::Internal(s1), SandmailError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl SandmailError {
    /// True for transport failures that simply mean the peer went away.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            SandmailError::ConnectionClosed => true,
            SandmailError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for SandmailError {
    fn from(e: std::io::Error) -> Self {
        SandmailError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for SandmailError {
    fn from(e: serde_json::Error) -> Self {
        SandmailError::Json(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SandmailError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SandmailError::Timeout
    }
}

impl From<std::string::FromUtf8Error> for SandmailError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        SandmailError::InvalidRequest(format!("invalid UTF-8: {e}"))
    }
}
