// tests/integration/smtp_session_test.rs

//! Full SMTP sessions against a live listener.

use super::test_helpers::{LineClient, SmtpTestServer, test_connections_config, wait_until};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sandmail::config::SmtpConfig;
use sandmail::core::sink::TextEncoding;

#[tokio::test]
async fn test_end_to_end_message_capture() {
    let mut server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;

    assert_eq!(client.expect_line().await, "220 test.local SMTP ready");

    client.send("EHLO test").await;
    assert_eq!(client.expect_line().await, "250-test.local");
    assert_eq!(client.expect_line().await, "250-8BITMIME");
    assert_eq!(client.expect_line().await, "250-SMTPUTF8");
    assert_eq!(client.expect_line().await, "250 OK");

    assert_eq!(client.command("MAIL FROM:<a@b.com>").await, "250 <a@b.com> OK");
    assert_eq!(client.command("RCPT TO:<c@d.com>").await, "250 <c@d.com> OK");
    assert!(client.command("DATA").await.starts_with("354 "));

    client.send("Hello").await;
    assert_eq!(client.command(".").await, "250 OK");

    let message = server.messages.recv().await.expect("captured message");
    assert_eq!(message.raw, "Hello");
    assert_eq!(message.recipients, vec!["c@d.com"]);
    assert_eq!(message.mail_from, "a@b.com");
    assert_eq!(message.encoding, TextEncoding::Ascii);

    assert_eq!(client.command("QUIT").await, "221 Goodbye!");
    assert_eq!(client.read_line().await, None);
    let manager = server.server.manager().clone();
    assert!(wait_until(|| manager.count() == 0).await);
}

#[tokio::test]
async fn test_precondition_ordering() {
    let mut server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;

    assert_eq!(client.command("HELO client").await, "250 test.local");
    assert!(client.command("RCPT TO:<c@d.com>").await.starts_with("503 "));
    assert!(client.command("MAIL FROM no-colon").await.starts_with("504 "));
    assert_eq!(client.command("MAIL FROM:<a@b.com>").await, "250 <a@b.com> OK");
    assert!(client.command("DATA").await.starts_with("503 "));
    assert_eq!(client.command("FOO bar").await, "500 Command not recognized");

    // The connection survives protocol errors.
    assert_eq!(client.command("NOOP").await, "250 OK");
    assert!(server.messages.try_recv().is_err());
}

#[tokio::test]
async fn test_rset_keeps_helo_and_pipelined_lines() {
    let mut server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;

    // Several commands in one write, the last one split across two writes.
    client
        .send_raw(b"HELO client\r\nMAIL FROM:<a@b.com>\r\nRSET\r\nRCPT TO:<c")
        .await;
    assert_eq!(client.expect_line().await, "250 test.local");
    assert_eq!(client.expect_line().await, "250 <a@b.com> OK");
    assert_eq!(client.expect_line().await, "250 OK");
    client.send_raw(b"@d.com>\r\n").await;
    assert!(client.expect_line().await.starts_with("503 "));

    // HELO survived the reset, so a new transaction may start.
    assert_eq!(client.command("MAIL FROM:<x@y.com>").await, "250 <x@y.com> OK");
    assert!(server.messages.try_recv().is_err());
}

#[tokio::test]
async fn test_dot_stuffed_utf8_body() {
    let mut server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;

    client.command("HELO client").await;
    client.command("MAIL FROM:<a@b.com> BODY=8BITMIME").await;
    client.command("RCPT TO:<c@d.com>").await;
    client.command("RCPT TO:<e@f.com>").await;
    client.command("DATA").await;
    client.send("Grüße").await;
    client.send("..").await;
    client.send(".hidden").await;
    assert_eq!(client.command(".").await, "250 OK");

    let message = server.messages.recv().await.expect("captured message");
    assert_eq!(message.raw, "Grüße\r\n.\r\nhidden");
    assert_eq!(message.recipients, vec!["c@d.com", "e@f.com"]);
    assert_eq!(message.encoding, TextEncoding::Utf8);
}

#[tokio::test]
async fn test_auth_plain_and_login() {
    let server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;

    let plain = STANDARD.encode(b"\0user\0secret");
    assert_eq!(
        client.command(&format!("AUTH PLAIN {plain}")).await,
        "235 Authentication successful"
    );

    assert_eq!(client.command("AUTH PLAIN").await, "334 ");
    assert_eq!(client.command(&plain).await, "235 Authentication successful");

    assert_eq!(client.command("AUTH LOGIN").await, "334 VXNlcm5hbWU6");
    assert_eq!(client.command(&STANDARD.encode("user")).await, "334 UGFzc3dvcmQ6");
    assert_eq!(
        client.command(&STANDARD.encode("secret")).await,
        "235 Authentication successful"
    );

    assert_eq!(client.command("AUTH LOGIN").await, "334 VXNlcm5hbWU6");
    assert_eq!(client.command("*").await, "501 Authentication cancelled");

    assert!(client.command("AUTH").await.starts_with("501 "));
    assert!(client.command("AUTH GSSAPI").await.starts_with("504 "));
}

#[tokio::test]
async fn test_stop_closes_sessions_and_listen_rebinds() {
    let server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;
    let manager = server.server.manager().clone();
    assert!(wait_until(|| manager.count() == 1).await);

    let rebound = server.server.listen("127.0.0.1", 0).await.expect("rebind");
    assert!(server.server.is_active().await);
    assert_eq!(manager.count(), 0);
    assert_eq!(client.read_line().await, None);

    let mut client = LineClient::connect(rebound).await;
    assert_eq!(client.expect_line().await, "220 test.local SMTP ready");

    server.server.shutdown().await;
    assert!(!server.server.is_active().await);
}

#[tokio::test]
async fn test_start_twice_is_a_listener_error() {
    let server = SmtpTestServer::start().await;
    let err = server.server.start("127.0.0.1", 0).await.unwrap_err();
    assert!(matches!(err, sandmail::SandmailError::Listener(_)));
}

#[tokio::test]
async fn test_auth_capability_follows_config() {
    let config = SmtpConfig {
        hostname: "test.local".to_string(),
        advertise_auth: true,
        ..SmtpConfig::default()
    };
    let server = SmtpTestServer::with_config(config, test_connections_config()).await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;

    client.send("EHLO test").await;
    let mut capabilities = Vec::new();
    loop {
        let line = client.expect_line().await;
        let last = line.starts_with("250 ");
        capabilities.push(line);
        if last {
            break;
        }
    }
    assert_eq!(
        capabilities,
        vec!["250-test.local", "250-8BITMIME", "250-SMTPUTF8", "250-AUTH PLAIN LOGIN", "250 OK"]
    );
}

#[tokio::test]
async fn test_smtputf8_sender_keeps_non_ascii_address() {
    let mut server = SmtpTestServer::start().await;
    let mut client = LineClient::connect(server.addr).await;
    client.expect_line().await;

    assert_eq!(client.command("HELO client").await, "250 test.local");
    assert_eq!(
        client.command("MAIL FROM:<josé@x.com> SMTPUTF8").await,
        "250 <josé@x.com> OK"
    );
    assert_eq!(client.command("RCPT TO:<zoë@y.com>").await, "250 <zoë@y.com> OK");
    assert!(client.command("DATA").await.starts_with("354 "));
    client.send("Grüße").await;
    assert_eq!(client.command(".").await, "250 OK");

    let message = server.messages.recv().await.expect("captured message");
    assert_eq!(message.mail_from, "josé@x.com");
    assert_eq!(message.recipients, vec!["zoë@y.com"]);
    assert_eq!(message.raw, "Grüße");
    assert_eq!(message.encoding, TextEncoding::Utf8);
}
