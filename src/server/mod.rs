// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod context;
mod coordinator;
mod initialization;
mod lifecycle;
mod listener;
mod spawner;

pub use context::ServerContext;
pub use coordinator::SmtpCoordinator;
pub use initialization::delegate_to_service;
pub use listener::Server;

/// The application startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Bind the listeners and settle SMTP ownership with the peer process.
    let mut ctx = initialization::setup(config).await?;

    // 2. Spawn the role-specific background tasks.
    spawner::spawn_all(&mut ctx)?;

    // 3. Run until a signal arrives, then shut down.
    lifecycle::run(ctx).await
}
