// src/core/tasks/mod.rs

//! Long-running background tasks.

pub mod idle_reaper;
pub mod message_logger;
pub mod status_logger;
