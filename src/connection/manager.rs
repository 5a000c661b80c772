// src/connection/manager.rs

//! Defines `ConnectionManager`, the registry of live connections for one listener.

use super::core::Connection;
use super::protocol::Protocol;
use crate::config::ConnectionsConfig;
use crate::core::metrics;
use crate::core::tasks::{idle_reaper::IdleReaperTask, status_logger::StatusLoggerTask};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Connection ids are unique for the lifetime of the process, across managers.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Owns every live connection accepted by one listener.
///
/// Invariant: every connection in the registry reports `is_connected()`.
/// Connections are removed before (or as) they close, by whichever party
/// closes them first.
#[derive(Debug)]
pub struct ConnectionManager {
    name: String,
    connections: DashMap<u64, Arc<Connection>>,
    settings: ConnectionsConfig,
    sweeps_started: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    pub fn new(name: impl Into<String>, settings: ConnectionsConfig) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            name: name.into(),
            connections: DashMap::new(),
            settings,
            sweeps_started: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ConnectionsConfig {
        &self.settings
    }

    /// Registers an accepted stream and starts its receive loop.
    pub fn create_connection<S>(
        self: &Arc<Self>,
        stream: S,
        peer_addr: SocketAddr,
        protocol: Box<dyn Protocol>,
    ) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (connection, reader) = Connection::new(id, peer_addr, stream);

        let manager = Arc::downgrade(self);
        connection.on_closed(Box::new(move |id| {
            if let Some(manager) = manager.upgrade() {
                manager.deregister(id);
            }
        }));

        self.connections.insert(id, connection.clone());
        metrics::ACTIVE_CONNECTIONS.inc();
        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();
        debug!("[{}] Registered connection {} from {}.", self.name, id, peer_addr);

        self.start_sweeps();
        connection.start(reader, protocol);
        connection
    }

    /// Starts the idle reaper and status logger the first time it is called.
    fn start_sweeps(self: &Arc<Self>) {
        if self.sweeps_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let reaper = IdleReaperTask::new(self.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(reaper.run(shutdown_rx));

        let status = StatusLoggerTask::new(self.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(status.run(shutdown_rx));
    }

    fn deregister(&self, id: u64) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(&id).map(|(_, connection)| connection);
        if removed.is_some() {
            metrics::ACTIVE_CONNECTIONS.dec();
            debug!("[{}] Deregistered connection {}.", self.name, id);
        }
        removed
    }

    pub fn get(&self, id: u64) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// A point-in-time copy of the registry, safe to iterate while connections
    /// are being added or removed.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Closes every connection idle for longer than `threshold` and returns
    /// how many were reaped. Connections failing their liveness check are
    /// closed as well but not counted.
    ///
    /// Idleness is judged first, so a connection stuck on a write it can never
    /// finish is still reaped and cannot stall the sweep.
    pub async fn reap_idle(&self, threshold: Duration) -> usize {
        let mut reaped = 0;
        for connection in self.snapshot() {
            if !connection.is_connected() {
                continue;
            }
            let idle = connection.idle_for();
            if idle > threshold {
                info!(
                    "[{}] Closing connection {} ({}) after {:?} of inactivity.",
                    self.name,
                    connection.id(),
                    connection.peer_addr(),
                    idle
                );
                self.deregister(connection.id());
                connection.close(false).await;
                metrics::CONNECTIONS_REAPED_TOTAL.inc();
                reaped += 1;
            } else {
                connection.is_valid_connection().await;
            }
        }
        reaped
    }

    /// Deregisters and closes every live connection.
    pub async fn close_all(&self) {
        let connections = self.snapshot();
        if !connections.is_empty() {
            info!("[{}] Closing {} connection(s).", self.name, connections.len());
        }
        for connection in connections {
            self.deregister(connection.id());
            connection.close(false).await;
        }
    }

    /// Stops the background sweeps and closes every connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.close_all().await;
    }
}
