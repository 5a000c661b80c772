// src/connection/core.rs

//! Defines `Connection`, the owner of one accepted socket.
//!
//! A connection runs exactly one receive loop. Every chunk read from the socket
//! is handed to the connection's `Protocol` in arrival order; replies go back
//! out through `send_line`/`send`. Closing is idempotent and may be triggered by
//! the protocol (QUIT), the peer (EOF or reset), the idle reaper, or shutdown.

use super::protocol::Protocol;
use crate::core::SandmailError;
use crate::core::framing::CRLF;
use crate::core::sink::TextEncoding;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The read-side half of a connection's stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// The write-side half of a connection's stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Invoked with the connection id once the connection has closed.
pub type ClosedCallback = Box<dyn FnOnce(u64) + Send>;

const RECEIVE_BUFFER_SIZE: usize = 8 * 1024;
const LIVENESS_CHECK_TIMEOUT: Duration = Duration::from_millis(100);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    connected: AtomicBool,
    last_activity: Mutex<Instant>,
    encoding: Mutex<TextEncoding>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    cancel: CancellationToken,
    on_closed: Mutex<Option<ClosedCallback>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Wraps a stream. The returned reader must be passed to `start`.
    pub fn new<S>(id: u64, peer_addr: SocketAddr, stream: S) -> (Arc<Self>, BoxedReader)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let connection = Arc::new(Self {
            id,
            peer_addr,
            connected: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            encoding: Mutex::new(TextEncoding::default()),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            cancel: CancellationToken::new(),
            on_closed: Mutex::new(None),
        });
        (connection, Box::new(reader))
    }

    /// Registers the closed notification. Only one callback is kept.
    pub fn on_closed(&self, callback: ClosedCallback) {
        *self.on_closed.lock() = Some(callback);
    }

    /// Spawns the receive loop.
    pub fn start(self: &Arc<Self>, reader: BoxedReader, protocol: Box<dyn Protocol>) -> JoinHandle<()> {
        let connection = self.clone();
        tokio::spawn(connection.receive_loop(reader, protocol))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time elapsed since the last byte was sent or received.
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn encoding(&self) -> TextEncoding {
        *self.encoding.lock()
    }

    pub fn set_encoding(&self, encoding: TextEncoding) {
        *self.encoding.lock() = encoding;
    }

    async fn receive_loop(self: Arc<Self>, mut reader: BoxedReader, mut protocol: Box<dyn Protocol>) {
        if let Err(e) = protocol.begin(&self).await {
            debug!("Connection {} failed to begin its protocol: {}", self.id, e);
            self.close(true).await;
            return;
        }

        let mut buf = BytesMut::with_capacity(RECEIVE_BUFFER_SIZE);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = reader.read_buf(&mut buf) => {
                    match result {
                        Ok(0) => {
                            debug!("Connection {} ({}) closed by peer.", self.id, self.peer_addr);
                            break;
                        }
                        Ok(_) => {
                            self.touch();
                            let chunk = buf.split();
                            if let Err(e) = protocol.process_incoming_buffer(&chunk, &self).await {
                                if e.is_normal_disconnect() {
                                    debug!("Connection {} lost while processing: {}", self.id, e);
                                } else {
                                    warn!("Connection {} protocol error: {}", self.id, e);
                                }
                                break;
                            }
                            if !self.is_connected() {
                                break;
                            }
                            buf.reserve(RECEIVE_BUFFER_SIZE);
                        }
                        Err(e) => {
                            let e = SandmailError::from(e);
                            if e.is_normal_disconnect() {
                                debug!("Connection {} ({}) reset: {}", self.id, self.peer_addr, e);
                            } else {
                                warn!("Receive error on connection {} ({}): {}", self.id, self.peer_addr, e);
                            }
                            break;
                        }
                    }
                }
            }
        }

        self.close(true).await;
    }

    /// Sends one line, appending CRLF unless the text already ends with it.
    pub async fn send_line(&self, text: &str) -> Result<(), SandmailError> {
        let mut bytes = self.encoding().encode(text);
        if !bytes.ends_with(CRLF) {
            bytes.extend_from_slice(CRLF);
        }
        debug!("Connection {} >> {}", self.id, text.trim_end());
        let sent = self.send(&bytes).await?;
        if sent < bytes.len() {
            return Err(SandmailError::ConnectionClosed);
        }
        Ok(())
    }

    /// Writes raw bytes and returns how many were accepted by the socket.
    /// A short write is logged and reported through the return value.
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SandmailError> {
        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(SandmailError::ConnectionClosed);
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SandmailError::ConnectionClosed),
                result = write_counted(writer, bytes) => result.map_err(SandmailError::from),
            }
        };

        match result {
            Ok(sent) => {
                self.touch();
                if sent < bytes.len() {
                    warn!(
                        "Short write on connection {}: sent {} of {} bytes.",
                        self.id,
                        sent,
                        bytes.len()
                    );
                }
                Ok(sent)
            }
            Err(e) => {
                if e.is_normal_disconnect() {
                    debug!("Send failed on connection {}: {}", self.id, e);
                } else {
                    warn!("Send failed on connection {}: {}", self.id, e);
                }
                self.close(true).await;
                Err(e)
            }
        }
    }

    /// Checks that the socket can still be used. A failing check closes the
    /// connection and reports it as invalid instead of returning an error.
    ///
    /// Never waits for the writer: while another task holds it, a write is in
    /// progress and the connection counts as valid.
    pub async fn is_valid_connection(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let check = match self.writer.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(writer) => tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(SandmailError::ConnectionClosed),
                    result = tokio::time::timeout(LIVENESS_CHECK_TIMEOUT, writer.flush()) => {
                        match result {
                            Ok(flushed) => flushed.map_err(SandmailError::from),
                            // A stalled flush means a full send buffer, not a dead socket.
                            Err(_) => Ok(()),
                        }
                    }
                },
                None => Err(SandmailError::ConnectionClosed),
            },
            Err(_) => {
                debug!("Connection {} is mid-write; skipping its liveness check.", self.id);
                Ok(())
            }
        };
        match check {
            Ok(()) => true,
            Err(e) => {
                warn!("Connection {} failed its liveness check: {}", self.id, e);
                self.close(true).await;
                false
            }
        }
    }

    /// Closes the connection. Safe to call any number of times from any task;
    /// only the first call has an effect.
    pub async fn close(&self, trigger_event: bool) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        // Cancelling above makes any in-flight `send` release the writer.
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Graceful shutdown of connection {} failed: {}", self.id, e),
                Err(_) => debug!("Graceful shutdown of connection {} timed out.", self.id),
            }
            drop(writer);
        }
        debug!("Connection {} ({}) closed.", self.id, self.peer_addr);

        let callback = self.on_closed.lock().take();
        if trigger_event && let Some(callback) = callback {
            callback(self.id);
        }
    }
}

async fn write_counted(writer: &mut BoxedWriter, bytes: &[u8]) -> std::io::Result<usize> {
    let mut sent = 0;
    while sent < bytes.len() {
        match writer.write(&bytes[sent..]).await? {
            0 => break,
            n => sent += n,
        }
    }
    writer.flush().await?;
    Ok(sent)
}
