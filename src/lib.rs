// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod ipcomm;
pub mod server;
pub mod smtp;

// Re-export
pub use crate::core::SandmailError;
