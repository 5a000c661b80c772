// tests/integration/ipcomm_test.rs

//! IPComm client/responder behavior over loopback sockets.

use super::test_helpers::{LineClient, init_tracing, start_ipcomm_server, wait_until};
use async_trait::async_trait;
use chrono::Utc;
use sandmail::core::events::{
    AppProcessExchangeEvent, EventBus, EventHandler, NewMessageEvent, PeerEvent,
    SmtpServerBindEvent,
};
use sandmail::ipcomm::IpCommClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(2);

struct ListenAddressResponder;

#[async_trait]
impl EventHandler for ListenAddressResponder {
    async fn handle(&self, event: &mut PeerEvent) {
        if let PeerEvent::AppProcessExchange(e) = event {
            e.smtp_listen_ip = Some("0.0.0.0".to_string());
            e.smtp_listen_port = Some(2525);
        }
    }
}

fn new_message() -> PeerEvent {
    PeerEvent::NewMessage(NewMessageEvent {
        mail_from: "a@b.com".to_string(),
        recipients: vec!["c@d.com".to_string()],
        size: 5,
        received_at: Utc::now(),
    })
}

#[tokio::test]
async fn test_publish_succeeds_without_reply() {
    let bus = Arc::new(EventBus::new());
    let mut received = bus.subscribe();
    let (_server, addr) = start_ipcomm_server(bus).await;

    let client = IpCommClient::new(addr.to_string(), 2);
    let event = new_message();
    assert!(client.publish(&event, TIMEOUT).await);

    let delivered = tokio::time::timeout(TIMEOUT, received.recv())
        .await
        .expect("event delivered")
        .expect("bus open");
    assert_eq!(delivered, event);
}

#[tokio::test]
async fn test_exchange_returns_responder_event() {
    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(ListenAddressResponder));
    let (_server, addr) = start_ipcomm_server(bus).await;

    let client = IpCommClient::new(addr.to_string(), 2);
    let hello = PeerEvent::AppProcessExchange(AppProcessExchangeEvent::default());
    let reply = client.exchange(&hello, TIMEOUT).await.expect("reply");

    let expected = PeerEvent::AppProcessExchange(AppProcessExchangeEvent {
        message_write_location: None,
        smtp_listen_ip: Some("0.0.0.0".to_string()),
        smtp_listen_port: Some(2525),
    });
    assert_eq!(reply, expected);
}

/// Answers with a folder below the one the requester sent.
struct MailFolderResponder;

#[async_trait]
impl EventHandler for MailFolderResponder {
    async fn handle(&self, event: &mut PeerEvent) {
        if let PeerEvent::AppProcessExchange(e) = event {
            let base = e.message_write_location.take().unwrap_or_default();
            e.message_write_location = Some(format!("{base}/José/受信"));
        }
    }
}

#[tokio::test]
async fn test_exchange_preserves_non_ascii_text() {
    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(MailFolderResponder));
    let (_server, addr) = start_ipcomm_server(bus).await;

    let client = IpCommClient::new(addr.to_string(), 2);
    let request = PeerEvent::AppProcessExchange(AppProcessExchangeEvent {
        message_write_location: Some("D:/Boîte".to_string()),
        ..Default::default()
    });
    let reply = client.exchange(&request, TIMEOUT).await.expect("reply");

    let expected = PeerEvent::AppProcessExchange(AppProcessExchangeEvent {
        message_write_location: Some("D:/Boîte/José/受信".to_string()),
        ..Default::default()
    });
    assert_eq!(reply, expected);
}

#[tokio::test]
async fn test_no_listener_is_reported_as_failure() {
    init_tracing();
    // Bind and drop to find a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = IpCommClient::new(format!("127.0.0.1:{port}"), 2);

    assert!(!client.publish(&new_message(), TIMEOUT).await);
    let hello = PeerEvent::AppProcessExchange(AppProcessExchangeEvent::default());
    assert!(client.exchange(&hello, TIMEOUT).await.is_none());
}

#[tokio::test]
async fn test_wrong_magic_is_treated_as_no_listener() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            use tokio::io::AsyncWriteExt;
            let _ = socket.write_all(b"SOMETHINGELSE\r\n").await;
        }
    });

    let client = IpCommClient::new(addr.to_string(), 2);
    assert!(!client.publish(&new_message(), TIMEOUT).await);
    assert_eq!(client.pooled_count(), 0);
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = IpCommClient::new(addr.to_string(), 2);
    let started = std::time::Instant::now();
    assert!(!client.publish(&new_message(), Duration::from_millis(200)).await);
    assert!(started.elapsed() < TIMEOUT);
}

#[tokio::test]
async fn test_pooled_connection_is_reused() {
    let bus = Arc::new(EventBus::new());
    let (server, addr) = start_ipcomm_server(bus).await;
    let manager = server.manager().clone();

    let client = IpCommClient::new(addr.to_string(), 2);
    assert!(client.publish(&new_message(), TIMEOUT).await);
    assert!(client.publish(&new_message(), TIMEOUT).await);
    assert!(client.publish(&new_message(), TIMEOUT).await);

    assert_eq!(client.pooled_count(), 1);
    assert_eq!(manager.count(), 1);

    assert_eq!(client.reap_idle(Duration::from_secs(60)), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.reap_idle(Duration::from_millis(1)), 1);
    assert_eq!(client.pooled_count(), 0);
    assert!(wait_until(|| manager.count() == 0).await);
}

#[tokio::test]
async fn test_stale_pooled_connection_is_replaced() {
    let bus = Arc::new(EventBus::new());
    let (server, addr) = start_ipcomm_server(bus).await;
    let manager = server.manager().clone();

    let client = IpCommClient::new(addr.to_string(), 2);
    assert!(client.publish(&new_message(), TIMEOUT).await);
    assert_eq!(client.pooled_count(), 1);

    // The responder drops the pooled socket behind the client's back.
    manager.close_all().await;

    let bind = PeerEvent::SmtpServerBind(SmtpServerBindEvent {
        ip: "127.0.0.1".to_string(),
        port: 2526,
    });
    assert!(client.publish(&bind, TIMEOUT).await);
    assert!(wait_until(|| manager.count() == 1).await);
}

#[tokio::test]
async fn test_raw_protocol_rejects_bad_header() {
    let bus = Arc::new(EventBus::new());
    let mut received = bus.subscribe();
    let (server, addr) = start_ipcomm_server(bus).await;

    let mut peer = LineClient::connect(addr).await;
    assert_eq!(peer.expect_line().await, "SANDMAIL");
    assert_eq!(peer.command("SANDMAIL").await, "SANDMAIL");
    peer.send(r#"{"CommandType":"Publish","Type":"Unheard","ByteSize":2}"#).await;

    assert_eq!(peer.read_line().await, None);
    assert!(received.try_recv().is_err());
    let manager = server.manager().clone();
    assert!(wait_until(|| manager.count() == 0).await);
}
