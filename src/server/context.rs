// src/server/context.rs

use super::listener::Server;
use crate::config::Config;
use crate::core::events::EventBus;
use crate::ipcomm::IpCommClient;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds everything the running application owns between setup and shutdown.
pub struct ServerContext {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub smtp: Arc<Server>,
    pub ipcomm: Arc<Server>,
    /// Client for the other process's IPComm listener.
    pub peer: Arc<IpCommClient>,
    /// True when this process bound the SMTP listener itself.
    pub owns_smtp: bool,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<()>>,
}
