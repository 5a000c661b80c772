// src/server/spawner.rs

//! Spawns the application's long-running background tasks.

use super::context::ServerContext;
use crate::config::Role;
use crate::core::events::EventType;
use crate::core::tasks::message_logger::MessageLoggerTask;
use crate::ipcomm::PeerForwarder;
use anyhow::Result;
use tracing::info;

/// Spawns all role-specific background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    match ctx.config.role {
        Role::Service => {
            let forwarder = PeerForwarder::new(
                ctx.bus.clone(),
                ctx.peer.clone(),
                vec![EventType::NewMessage],
                ctx.config.ipcomm.timeout,
            )
            .with_reaping(
                ctx.config.connections.sweep_interval,
                ctx.config.connections.idle_timeout,
            );
            let shutdown_rx_forward = shutdown_tx.subscribe();
            background_tasks.spawn(async move {
                forwarder.run(shutdown_rx_forward).await;
                Ok(())
            });
        }
        Role::Ui => {
            let logger = MessageLoggerTask::new(ctx.bus.clone());
            let shutdown_rx_logger = shutdown_tx.subscribe();
            background_tasks.spawn(async move {
                logger.run(shutdown_rx_logger).await;
                Ok(())
            });
        }
    }

    info!(
        "Spawned {} background task(s); SMTP listener owned by {}.",
        background_tasks.len(),
        if ctx.owns_smtp { "this process" } else { "the service" }
    );
    Ok(())
}
