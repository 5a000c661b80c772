// tests/property/dot_stuffing_test.rs

//! A dot-stuffed body sent through DATA comes back unchanged.

use proptest::prelude::*;
use sandmail::core::sink::ChannelSink;
use sandmail::smtp::SmtpProtocol;
use std::sync::Arc;

fn stuff(line: &str) -> String {
    if line.starts_with('.') {
        format!(".{line}")
    } else {
        line.to_string()
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_dot_stuffing_round_trip(
        body in proptest::collection::vec("\\.{0,3}[ -~]{0,30}", 0..30)
    ) {
        let (sink, _rx) = ChannelSink::new();
        let mut protocol = SmtpProtocol::new("localhost", Arc::new(sink), 4096);
        protocol.greeting();

        for command in ["HELO client", "MAIL FROM:<a@b.com>", "RCPT TO:<c@d.com>", "DATA"] {
            protocol.handle_line(command);
        }
        for line in &body {
            let step = protocol.handle_line(&stuff(line));
            prop_assert!(step.replies.is_empty());
            prop_assert!(step.delivery.is_none());
        }

        let step = protocol.handle_line(".");
        let message = step.delivery.expect("a lone dot terminates the body");
        prop_assert_eq!(message.raw, body.join("\r\n"));
    }
}
