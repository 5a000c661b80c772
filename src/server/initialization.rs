// src/server/initialization.rs

//! Builds the listeners, the event bus and the peer client, and settles which
//! process owns the SMTP listener.

use super::context::ServerContext;
use super::coordinator::SmtpCoordinator;
use super::listener::Server;
use crate::config::{Config, Role};
use crate::connection::ConnectionManager;
use crate::core::events::{AppProcessExchangeEvent, EventBus, PeerEvent, SmtpServerBindEvent};
use crate::core::sink::{BusSink, MessageSink};
use crate::ipcomm::{self, IpCommClient};
use crate::smtp;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before entering the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);
    let bus = Arc::new(EventBus::new());

    let sink: Arc<dyn MessageSink> = Arc::new(BusSink::new(bus.clone()));
    let smtp = Server::new(
        "smtp",
        ConnectionManager::new("smtp", config.connections.clone()),
        smtp::protocol_factory(&config.smtp, sink),
    );
    let ipcomm = Server::new(
        "ipcomm",
        ConnectionManager::new("ipcomm", config.connections.clone()),
        ipcomm::protocol_factory(bus.clone(), config.ipcomm.max_payload_bytes),
    );

    let (own_port, peer_port) = match config.role {
        Role::Service => (config.ipcomm.service_port, config.ipcomm.ui_port),
        Role::Ui => (config.ipcomm.ui_port, config.ipcomm.service_port),
    };
    ipcomm
        .start(&config.ipcomm.ip, own_port)
        .await
        .with_context(|| format!("Failed to start the IPComm listener on port {own_port}"))?;
    let peer = Arc::new(IpCommClient::new(
        format!("{}:{}", config.ipcomm.ip, peer_port),
        config.ipcomm.max_pooled,
    ));

    let owns_smtp = match config.role {
        Role::Service => true,
        Role::Ui => !delegate_to_service(&config, &peer).await,
    };
    if owns_smtp {
        bus.register(Arc::new(SmtpCoordinator::new(smtp.clone())));
        smtp.start(&config.smtp.ip, config.smtp.port)
            .await
            .context("Failed to start the SMTP listener")?;
    }

    Ok(ServerContext {
        config,
        bus,
        smtp,
        ipcomm,
        peer,
        owns_smtp,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Asks a running service for its SMTP address. Returns true when a service
/// answered and therefore keeps the listener; if its address differs from our
/// configuration, the service is asked to rebind.
pub async fn delegate_to_service(config: &Config, peer: &IpCommClient) -> bool {
    let hello = PeerEvent::AppProcessExchange(AppProcessExchangeEvent::default());
    let reply = match peer.exchange(&hello, config.ipcomm.timeout).await {
        Some(PeerEvent::AppProcessExchange(reply)) => reply,
        Some(other) => {
            warn!(
                "Service at {} answered with an unexpected {} event; binding SMTP locally.",
                peer.endpoint(),
                other.event_type()
            );
            return false;
        }
        None => {
            info!("No background service answered at {}; binding SMTP locally.", peer.endpoint());
            return false;
        }
    };

    info!(
        "Background service at {} owns the SMTP listener ({}:{}).",
        peer.endpoint(),
        reply.smtp_listen_ip.as_deref().unwrap_or("?"),
        reply
            .smtp_listen_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string())
    );

    let wanted_ip = config.smtp.ip.as_str();
    let wanted_port = config.smtp.port;
    if reply.smtp_listen_ip.as_deref() != Some(wanted_ip) || reply.smtp_listen_port != Some(wanted_port) {
        let bind = PeerEvent::SmtpServerBind(SmtpServerBindEvent {
            ip: wanted_ip.to_string(),
            port: wanted_port,
        });
        if peer.publish(&bind, config.ipcomm.timeout).await {
            info!("Asked the service to rebind SMTP to {}:{}.", wanted_ip, wanted_port);
        } else {
            warn!("Could not ask the service to rebind SMTP to {}:{}.", wanted_ip, wanted_port);
        }
    }
    true
}

fn log_startup_info(config: &Config) {
    info!(
        "Sandmail v{} starting as {:?}.",
        env!("CARGO_PKG_VERSION"),
        config.role
    );
    info!(
        "SMTP {}:{} (host '{}'), IPComm {} ports {}/{}, idle timeout {:?}.",
        config.smtp.ip,
        config.smtp.port,
        config.smtp.hostname,
        config.ipcomm.ip,
        config.ipcomm.service_port,
        config.ipcomm.ui_port,
        config.connections.idle_timeout
    );
}
