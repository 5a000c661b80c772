// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle. The status logger reports
//! them through `MetricsSnapshot`.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, register_counter, register_gauge};

lazy_static! {
    /// The number of connections currently held in any connection registry.
    pub static ref ACTIVE_CONNECTIONS: Gauge =
        register_gauge!("sandmail_active_connections", "Number of currently open connections.").unwrap();

    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("sandmail_connections_accepted_total", "Total number of connections accepted.").unwrap();
    /// The total number of connections closed by the idle reaper.
    pub static ref CONNECTIONS_REAPED_TOTAL: Counter =
        register_counter!("sandmail_connections_reaped_total", "Total number of idle connections closed.").unwrap();
    /// The total number of messages captured by the SMTP listener.
    pub static ref MESSAGES_RECEIVED_TOTAL: Counter =
        register_counter!("sandmail_messages_received_total", "Total number of messages captured.").unwrap();
    /// The total number of IPComm requests served.
    pub static ref IPCOMM_REQUESTS_TOTAL: Counter =
        register_counter!("sandmail_ipcomm_requests_total", "Total number of IPComm requests served.").unwrap();
}

/// The process-wide counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub active_connections: u64,
    pub connections_accepted: u64,
    pub connections_reaped: u64,
    pub messages_received: u64,
    pub ipcomm_requests: u64,
}

impl MetricsSnapshot {
    pub fn capture() -> Self {
        Self {
            active_connections: ACTIVE_CONNECTIONS.get().max(0.0) as u64,
            connections_accepted: CONNECTIONS_ACCEPTED_TOTAL.get() as u64,
            connections_reaped: CONNECTIONS_REAPED_TOTAL.get() as u64,
            messages_received: MESSAGES_RECEIVED_TOTAL.get() as u64,
            ipcomm_requests: IPCOMM_REQUESTS_TOTAL.get() as u64,
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} open connection(s) process-wide, {} accepted, {} reaped, {} message(s) captured, {} IPComm request(s) served",
            self.active_connections,
            self.connections_accepted,
            self.connections_reaped,
            self.messages_received,
            self.ipcomm_requests
        )
    }
}
