// src/server/coordinator.rs

use super::listener::Server;
use crate::core::events::{EventHandler, PeerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Ties peer events to the SMTP listener owned by this process: answers
/// `AppProcessExchange` with the bound address and applies `SmtpServerBind`.
pub struct SmtpCoordinator {
    smtp: Arc<Server>,
}

impl SmtpCoordinator {
    pub fn new(smtp: Arc<Server>) -> Self {
        Self { smtp }
    }
}

#[async_trait]
impl EventHandler for SmtpCoordinator {
    async fn handle(&self, event: &mut PeerEvent) {
        match event {
            PeerEvent::AppProcessExchange(exchange) => {
                if let Some((ip, port)) = self.smtp.endpoint().await {
                    exchange.smtp_listen_ip = Some(ip);
                    exchange.smtp_listen_port = Some(port);
                }
            }
            PeerEvent::SmtpServerBind(bind) => {
                info!("Peer requested SMTP rebind to {}:{}.", bind.ip, bind.port);
                match self.smtp.listen(&bind.ip, bind.port).await {
                    Ok(addr) => info!("SMTP listener rebound to {}.", addr),
                    Err(e) => error!("SMTP rebind to {}:{} failed: {}", bind.ip, bind.port, e),
                }
            }
            PeerEvent::NewMessage(_) => {}
        }
    }
}
