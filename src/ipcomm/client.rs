// src/ipcomm/client.rs

//! The initiating side of IPComm.
//!
//! Every public operation runs under a caller-supplied timeout and reports
//! failure as `false`/`None`: an unreachable, slow or incompatible peer is
//! indistinguishable from no peer at all.

use super::request::{ACK, CommandType, IpCommRequest, MAGIC};
use crate::core::SandmailError;
use crate::core::events::PeerEvent;
use crate::core::framing::LineCodec;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// Upper bound for a single reply line read from a peer.
const MAX_REPLY_LINE: usize = 16 * 1024 * 1024;

type PeerStream = Framed<TcpStream, LineCodec>;

struct PooledConnection {
    framed: PeerStream,
    last_used: Instant,
}

/// A client for one peer endpoint, keeping a small pool of verified
/// connections.
pub struct IpCommClient {
    endpoint: String,
    max_pooled: usize,
    pool: Mutex<Vec<PooledConnection>>,
}

impl std::fmt::Debug for IpCommClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpCommClient")
            .field("endpoint", &self.endpoint)
            .field("pooled", &self.pooled_count())
            .finish()
    }
}

impl IpCommClient {
    pub fn new(endpoint: impl Into<String>, max_pooled: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_pooled,
            pool: Mutex::new(Vec::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Delivers `event` to the peer. Returns `true` once the peer has taken the
    /// payload; nothing is read back.
    pub async fn publish(&self, event: &PeerEvent, timeout: Duration) -> bool {
        match within(timeout, self.request(CommandType::Publish, event)).await {
            Ok(_) => true,
            Err(e) => {
                debug!("IPComm publish to {} failed: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Delivers `event` and returns the peer's reply event of the same type.
    pub async fn exchange(&self, event: &PeerEvent, timeout: Duration) -> Option<PeerEvent> {
        match within(timeout, self.request(CommandType::Exchange, event)).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("IPComm exchange with {} failed: {}", self.endpoint, e);
                None
            }
        }
    }

    /// Drops pooled connections unused for longer than `max_idle` and returns
    /// how many were dropped.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let mut pool = self.pool.lock();
        let before = pool.len();
        pool.retain(|pooled| pooled.last_used.elapsed() <= max_idle);
        before - pool.len()
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.lock().len()
    }

    async fn request(
        &self,
        command_type: CommandType,
        event: &PeerEvent,
    ) -> Result<Option<PeerEvent>, SandmailError> {
        let (request, payload) = IpCommRequest::for_event(command_type, event)?;
        let mut framed = self.checkout().await?;

        // Past this point the payload may have reached the peer, so a failure
        // is reported instead of retried.
        framed.send(request.to_line()?).await?;
        expect_line(&mut framed, ACK).await?;
        {
            let stream = framed.get_mut();
            stream.write_all(&payload).await?;
            stream.flush().await?;
        }

        let reply = match command_type {
            CommandType::Publish => None,
            CommandType::Exchange => {
                let line = read_line(&mut framed).await?;
                Some(PeerEvent::decode(request.event_type, line.as_bytes())?)
            }
        };

        self.checkin(framed);
        Ok(reply)
    }

    /// Returns a connection that has just completed the magic token round
    /// trip. A stale pooled connection is discarded and replaced once.
    async fn checkout(&self) -> Result<PeerStream, SandmailError> {
        let pooled = self.pool.lock().pop();
        if let Some(pooled) = pooled {
            let mut framed = pooled.framed;
            match sync(&mut framed).await {
                Ok(()) => return Ok(framed),
                Err(e) => debug!("Discarding stale pooled connection to {}: {}", self.endpoint, e),
            }
        }

        let mut framed = self.connect().await?;
        sync(&mut framed).await?;
        Ok(framed)
    }

    fn checkin(&self, framed: PeerStream) {
        let mut pool = self.pool.lock();
        if pool.len() < self.max_pooled {
            pool.push(PooledConnection {
                framed,
                last_used: Instant::now(),
            });
        }
    }

    /// Opens a connection and verifies the responder's greeting token.
    async fn connect(&self) -> Result<PeerStream, SandmailError> {
        let stream = TcpStream::connect(&self.endpoint).await?;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, LineCodec::with_max_length(MAX_REPLY_LINE));
        expect_line(&mut framed, MAGIC).await?;
        debug!("IPComm connected to {}.", self.endpoint);
        Ok(framed)
    }
}

/// Runs `request` under `timeout`; running out of time is `SandmailError::Timeout`.
async fn within<T>(
    timeout: Duration,
    request: impl Future<Output = Result<T, SandmailError>>,
) -> Result<T, SandmailError> {
    tokio::time::timeout(timeout, request).await?
}

/// Sends the magic token and waits for it to be echoed.
async fn sync(framed: &mut PeerStream) -> Result<(), SandmailError> {
    framed.send(MAGIC.to_string()).await?;
    expect_line(framed, MAGIC).await
}

async fn read_line(framed: &mut PeerStream) -> Result<String, SandmailError> {
    match framed.next().await {
        Some(result) => result,
        None => Err(SandmailError::ConnectionClosed),
    }
}

async fn expect_line(framed: &mut PeerStream, expected: &str) -> Result<(), SandmailError> {
    let line = read_line(framed).await?;
    if line.trim() != expected {
        return Err(SandmailError::Handshake(format!(
            "expected '{expected}', received '{line}'"
        )));
    }
    Ok(())
}
