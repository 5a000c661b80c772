// tests/integration/coordinator_test.rs

//! SMTP ownership negotiation between the two processes over IPComm.

use super::test_helpers::{LineClient, SmtpTestServer, init_tracing, start_ipcomm_server};
use sandmail::config::Config;
use sandmail::core::events::{AppProcessExchangeEvent, EventBus, PeerEvent, SmtpServerBindEvent};
use sandmail::ipcomm::IpCommClient;
use sandmail::server::{Server, SmtpCoordinator, delegate_to_service};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const TIMEOUT: Duration = Duration::from_secs(2);

/// A loopback port nobody is listening on right now.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_port(server: &Server, port: u16) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if server.local_addr().await.map(|a| a.port()) == Some(port) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A service process: SMTP listener plus an IPComm endpoint whose bus carries
/// the coordinator.
async fn start_service() -> (SmtpTestServer, Arc<Server>, SocketAddr) {
    let smtp = SmtpTestServer::start().await;
    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(SmtpCoordinator::new(smtp.server.clone())));
    let (ipcomm, ipcomm_addr) = start_ipcomm_server(bus).await;
    (smtp, ipcomm, ipcomm_addr)
}

fn ui_config(smtp_port: u16) -> Config {
    let mut config = Config::default();
    config.smtp.ip = "127.0.0.1".to_string();
    config.smtp.port = smtp_port;
    config.ipcomm.timeout = TIMEOUT;
    config
}

#[tokio::test]
async fn test_exchange_reports_bound_smtp_endpoint() {
    let (smtp, _ipcomm, ipcomm_addr) = start_service().await;
    let client = IpCommClient::new(ipcomm_addr.to_string(), 2);

    let request = PeerEvent::AppProcessExchange(AppProcessExchangeEvent::default());
    let reply = client.exchange(&request, TIMEOUT).await.expect("reply");

    let expected = PeerEvent::AppProcessExchange(AppProcessExchangeEvent {
        message_write_location: None,
        smtp_listen_ip: Some("127.0.0.1".to_string()),
        smtp_listen_port: Some(smtp.addr.port()),
    });
    assert_eq!(reply, expected);
}

#[tokio::test]
async fn test_published_bind_moves_smtp_listener() {
    let (smtp, _ipcomm, ipcomm_addr) = start_service().await;
    let client = IpCommClient::new(ipcomm_addr.to_string(), 2);
    let old_addr = smtp.addr;
    let new_port = free_port().await;

    let bind = PeerEvent::SmtpServerBind(SmtpServerBindEvent {
        ip: "127.0.0.1".to_string(),
        port: new_port,
    });
    assert!(client.publish(&bind, TIMEOUT).await);
    assert!(wait_for_port(&smtp.server, new_port).await);

    let mut moved = LineClient::connect(SocketAddr::from(([127, 0, 0, 1], new_port))).await;
    assert_eq!(moved.expect_line().await, "220 test.local SMTP ready");
    assert!(TcpStream::connect(old_addr).await.is_err());
}

#[tokio::test]
async fn test_ui_delegates_to_running_service_and_requests_rebind() {
    let (smtp, _ipcomm, ipcomm_addr) = start_service().await;
    let peer = IpCommClient::new(ipcomm_addr.to_string(), 2);
    let wanted_port = free_port().await;

    assert!(delegate_to_service(&ui_config(wanted_port), &peer).await);
    assert!(wait_for_port(&smtp.server, wanted_port).await);
}

#[tokio::test]
async fn test_ui_leaves_matching_service_alone() {
    let (smtp, _ipcomm, ipcomm_addr) = start_service().await;
    let peer = IpCommClient::new(ipcomm_addr.to_string(), 2);

    assert!(delegate_to_service(&ui_config(smtp.addr.port()), &peer).await);
    assert_eq!(smtp.server.local_addr().await, Some(smtp.addr));
}

#[tokio::test]
async fn test_ui_binds_locally_without_service() {
    init_tracing();
    let peer = IpCommClient::new(format!("127.0.0.1:{}", free_port().await), 2);
    assert!(!delegate_to_service(&ui_config(2525), &peer).await);
}
