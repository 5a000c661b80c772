// src/server/listener.rs

//! Defines `Server`, a restartable TCP listener that hands every accepted
//! socket to its `ConnectionManager`.

use crate::connection::{ConnectionManager, ProtocolFactory};
use crate::core::SandmailError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct ActiveListener {
    /// The address as requested by the caller, before resolution.
    ip: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Server {
    name: String,
    manager: Arc<ConnectionManager>,
    factory: ProtocolFactory,
    active: Mutex<Option<ActiveListener>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("name", &self.name).finish()
    }
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        manager: Arc<ConnectionManager>,
        factory: ProtocolFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            manager,
            factory,
            active: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Binds `ip:port` and starts accepting. Port 0 picks a free port; the
    /// bound address is returned. Fails if already listening or the bind fails.
    pub async fn start(&self, ip: &str, port: u16) -> Result<SocketAddr, SandmailError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            return Err(SandmailError::Listener(format!(
                "{} is already listening on {}",
                self.name, current.local_addr
            )));
        }

        let listener = TcpListener::bind((ip, port)).await.map_err(|e| {
            SandmailError::Listener(format!("{} failed to bind {}:{}: {}", self.name, ip, port, e))
        })?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            self.name.clone(),
            listener,
            self.manager.clone(),
            self.factory.clone(),
            cancel.clone(),
        ));

        info!("[{}] Listening on {}.", self.name, local_addr);
        *active = Some(ActiveListener {
            ip: ip.to_string(),
            local_addr,
            cancel,
            task,
        });
        Ok(local_addr)
    }

    /// Stops accepting, releases the port and closes every live connection.
    /// Does nothing when not listening.
    pub async fn stop(&self) {
        let previous = self.active.lock().await.take();
        let Some(previous) = previous else {
            return;
        };

        previous.cancel.cancel();
        if let Err(e) = previous.task.await {
            error!("[{}] Accept loop ended abnormally: {}", self.name, e);
        }
        self.manager.close_all().await;
        info!("[{}] Stopped listening on {}.", self.name, previous.local_addr);
    }

    /// Rebinds: stop, then start on the new address.
    pub async fn listen(&self, ip: &str, port: u16) -> Result<SocketAddr, SandmailError> {
        self.stop().await;
        self.start(ip, port).await
    }

    /// Stops the listener and the manager's background sweeps.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.manager.shutdown().await;
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.active.lock().await.as_ref().map(|a| a.local_addr)
    }

    /// The requested address and the bound port.
    pub async fn endpoint(&self) -> Option<(String, u16)> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| (a.ip.clone(), a.local_addr.port()))
    }
}

async fn accept_loop(
    name: String,
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    factory: ProtocolFactory,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = listener.accept() => match res {
                Ok((socket, addr)) => {
                    debug!("[{}] Accepted connection from {}.", name, addr);
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("[{}] Could not set TCP_NODELAY for {}: {}", name, addr, e);
                    }
                    manager.create_connection(socket, addr, factory());
                }
                Err(e) => {
                    error!("[{}] Failed to accept connection: {}", name, e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
    debug!("[{}] Accept loop exited.", name);
}
