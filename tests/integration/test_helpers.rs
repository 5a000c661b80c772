// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use sandmail::config::{ConnectionsConfig, SmtpConfig};
use sandmail::connection::ConnectionManager;
use sandmail::core::events::EventBus;
use sandmail::core::sink::{ChannelSink, ReceivedMessage};
use sandmail::ipcomm;
use sandmail::server::Server;
use sandmail::smtp;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;

/// How long a test waits for any single reply before failing.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

pub fn test_connections_config() -> ConnectionsConfig {
    ConnectionsConfig {
        idle_timeout: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(60),
        status_interval: Duration::from_secs(600),
    }
}

/// An SMTP listener on an ephemeral loopback port whose captured messages
/// arrive on `messages`.
pub struct SmtpTestServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    pub messages: UnboundedReceiver<ReceivedMessage>,
}

impl SmtpTestServer {
    pub async fn start() -> Self {
        Self::with_connections(test_connections_config()).await
    }

    pub async fn with_connections(connections: ConnectionsConfig) -> Self {
        let config = SmtpConfig {
            hostname: "test.local".to_string(),
            ..SmtpConfig::default()
        };
        Self::with_config(config, connections).await
    }

    pub async fn with_config(config: SmtpConfig, connections: ConnectionsConfig) -> Self {
        init_tracing();
        let (sink, messages) = ChannelSink::new();
        let server = Server::new(
            "smtp-test",
            ConnectionManager::new("smtp-test", connections),
            smtp::protocol_factory(&config, Arc::new(sink)),
        );
        let addr = server.start("127.0.0.1", 0).await.expect("bind SMTP test server");
        Self {
            server,
            addr,
            messages,
        }
    }
}

/// An IPComm listener on an ephemeral loopback port, dispatching to `bus`.
pub async fn start_ipcomm_server(bus: Arc<EventBus>) -> (Arc<Server>, SocketAddr) {
    init_tracing();
    let server = Server::new(
        "ipcomm-test",
        ConnectionManager::new("ipcomm-test", test_connections_config()),
        ipcomm::protocol_factory(bus, 1024 * 1024),
    );
    let addr = server.start("127.0.0.1", 0).await.expect("bind IPComm test server");
    (server, addr)
}

/// A line-oriented test client.
pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write line");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write bytes");
    }

    /// Reads one line without its terminator; `None` on EOF.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a reply")
            .expect("read line");
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn expect_line(&mut self) -> String {
        self.read_line().await.expect("connection closed unexpectedly")
    }

    /// Sends a command and returns its single-line reply.
    pub async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.expect_line().await
    }
}

/// Polls `condition` until it holds or the reply timeout passes.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
