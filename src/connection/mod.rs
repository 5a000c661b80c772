// src/connection/mod.rs

//! Manages the lifecycle of accepted sockets: the per-socket `Connection`, the
//! `Protocol` capability it drives, and the `ConnectionManager` registry.

mod core;
mod manager;
mod protocol;

pub use self::core::{BoxedReader, BoxedWriter, ClosedCallback, Connection};
pub use manager::ConnectionManager;
pub use protocol::{Protocol, ProtocolFactory};
