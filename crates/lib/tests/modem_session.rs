//! Integration test: drive the modem provider against a fake modem on a local TCP port
//! (the `serial_tcp` transport). Covers the init sequence, an incoming message, a send
//! round trip, a status report, and the feed dying when the modem goes away.

use smsxmpp::channels::handoff;
use smsxmpp::directory::StaticDirectory;
use smsxmpp::provider::{ModemProvider, ModemTransport, ProviderError, SmsProvider};
use smsxmpp::sms::{InboundSms, Sms};
use smsxmpp::translator::{Translator, TranslatorConfig};
use smsxmpp::xmpp::{ChatMessage, Jid};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const CTRL_Z: u8 = 0x1a;

/// What the fake modem saw: a command line, or message text sent after a prompt.
#[derive(Debug, PartialEq)]
enum Seen {
    Command(String),
    Text(String),
}

/// Answers AT commands with OK, `AT+CMGS` with a prompt and reference 42, and writes
/// whatever arrives on `push` as unsolicited output. `before_reference` is written
/// between receiving message text and answering `+CMGS`. Closes the line when `push`
/// is dropped.
async fn fake_modem(
    mut socket: TcpStream,
    seen: mpsc::UnboundedSender<Seen>,
    mut push: mpsc::UnboundedReceiver<String>,
    before_reference: String,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    let mut awaiting_text = false;
    loop {
        tokio::select! {
            n = socket.read(&mut chunk) => {
                let n = match n {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    if awaiting_text {
                        let Some(pos) = buf.iter().position(|&b| b == CTRL_Z) else { break };
                        let text: Vec<u8> = buf.drain(..=pos).collect();
                        let _ = seen.send(Seen::Text(String::from_utf8_lossy(&text[..pos]).to_string()));
                        awaiting_text = false;
                        let _ = socket.write_all(before_reference.as_bytes()).await;
                        let _ = socket.write_all(b"\r\n+CMGS: 42\r\n\r\nOK\r\n").await;
                        continue;
                    }
                    let Some(pos) = buf.iter().position(|&b| b == b'\r') else { break };
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let command = String::from_utf8_lossy(&line).trim().to_string();
                    if command.is_empty() {
                        continue;
                    }
                    if command.starts_with("AT+CMGS=") {
                        awaiting_text = true;
                        let _ = socket.write_all(b"\r\n> ").await;
                    } else {
                        let _ = socket.write_all(b"\r\nOK\r\n").await;
                    }
                    let _ = seen.send(Seen::Command(command));
                }
            }
            out = push.recv() => match out {
                Some(out) => {
                    let _ = socket.write_all(out.as_bytes()).await;
                }
                None => return,
            },
        }
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn modem_session_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake modem");
    let addr = listener.local_addr().expect("local_addr").to_string();

    let provider = ModemProvider::connect(ModemTransport::SerialTcp(addr), "+15550001111")
        .await
        .expect("connect to fake modem")
        .with_response_timeout(Duration::from_secs(5));
    let provider = Arc::new(provider);
    let (socket, _) = listener.accept().await.expect("accept");

    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let (push, push_rx) = mpsc::unbounded_channel();
    tokio::spawn(fake_modem(socket, seen_tx, push_rx, String::new()));

    let (deliver_to, mut inbound) = mpsc::channel(4);
    let health = provider.clone().run_inbound_feed(deliver_to);

    let mut init = Vec::new();
    for _ in 0..4 {
        init.push(next(&mut seen).await);
    }
    assert_eq!(
        init,
        vec![
            Seen::Command("ATE0".to_string()),
            Seen::Command("AT+CMGF=1".to_string()),
            Seen::Command("AT+CSMP=49,167,0,0".to_string()),
            Seen::Command("AT+CNMI=2,2,0,1,0".to_string()),
        ]
    );

    push.send("\r\n+CMT: \"+15551234567\",,\"24/10/19,12:00:00+08\"\r\nhello there\r\n".to_string())
        .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("timed out waiting for inbound sms")
        .expect("feed closed");
    assert_eq!(
        got,
        InboundSms::Message(Sms::new("+15550001111", "+15551234567", "hello there").unwrap())
    );

    let sms = Sms::new("+15559876543", "+15550001111", "reply").unwrap();
    let reference = provider.send_sms(&sms).await.expect("send sms");
    assert_eq!(reference, "42");
    assert_eq!(
        next(&mut seen).await,
        Seen::Command("AT+CMGS=\"15559876543\",145".to_string())
    );
    assert_eq!(next(&mut seen).await, Seen::Text("reply".to_string()));

    push.send(
        "\r\n+CDS: 6,42,\"+15559876543\",145,\"24/10/19,12:00:00+08\",\"24/10/19,12:00:05+08\",0\r\n"
            .to_string(),
    )
    .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("timed out waiting for status report")
        .expect("feed closed");
    assert_eq!(got, InboundSms::DeliveryReport { id: "42".to_string() });

    drop(push);
    tokio::time::timeout(Duration::from_secs(5), health)
        .await
        .expect("feed should end when the modem disconnects")
        .expect("feed task");
    let err = provider.send_sms(&sms).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotConnected));
}

#[tokio::test]
async fn unreachable_modem_fails_to_connect() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
        listener.local_addr().expect("local_addr").port()
    };
    let transport = ModemTransport::SerialTcp(format!("127.0.0.1:{}", port));
    let err = match ModemProvider::connect(transport, "+15550001111").await {
        Ok(_) => panic!("connect should fail"),
        Err(e) => e,
    };
    assert!(matches!(err, ProviderError::Io(_)));
}

/// Messages arriving while `AT+CMGS` waits for its reference must not hold up the send,
/// and the reference must still be matched by the later status report.
#[tokio::test]
async fn incoming_messages_during_send_do_not_block_the_reference() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake modem");
    let addr = listener.local_addr().expect("local_addr").to_string();
    let provider = ModemProvider::connect(ModemTransport::SerialTcp(addr), "+15550001111")
        .await
        .expect("connect to fake modem")
        .with_response_timeout(Duration::from_secs(10));
    let provider = Arc::new(provider);
    let (socket, _) = listener.accept().await.expect("accept");

    let mut before_reference = String::new();
    for body in ["first", "second", "third"] {
        before_reference.push_str(&format!(
            "\r\n+CMT: \"+15551234567\",,\"24/10/19,12:00:00+08\"\r\n{}\r\n",
            body
        ));
    }
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let (push, push_rx) = mpsc::unbounded_channel();
    tokio::spawn(fake_modem(socket, seen_tx, push_rx, before_reference));

    let (sms_tx, sms_inbox) = handoff::<InboundSms>();
    let (to_gateway, gateway_inbox) = handoff::<ChatMessage>();
    let (to_xmpp, mut xmpp_rx) = mpsc::channel(8);
    let feed = provider.clone().run_inbound_feed(sms_tx);
    for _ in 0..4 {
        next(&mut seen).await;
    }

    let config = Arc::new(TranslatorConfig {
        domain: "gw.example".to_string(),
        target: Some(Jid::new("user", "example.com")),
        own_number: "+15550001111".to_string(),
    });
    let translator = Translator::new(
        config,
        provider.clone(),
        Arc::new(StaticDirectory::default()),
        to_xmpp,
    )
    .spawn(sms_inbox, gateway_inbox);

    let mut msg = ChatMessage::chat(
        "orig-1".to_string(),
        Jid::new("user", "example.com"),
        Jid::new("15559876543", "gw.example"),
        "reply",
    );
    msg.receipt_request = true;
    let started = Instant::now();
    to_gateway.send(msg).await.unwrap();

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let got = tokio::time::timeout(Duration::from_secs(3), xmpp_rx.recv())
            .await
            .expect("incoming message held up by the send")
            .expect("translator stopped");
        bodies.push(got.body);
    }
    bodies.sort();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(next(&mut seen).await, Seen::Command("AT+CMGS=\"15559876543\",145".to_string()));
    assert_eq!(next(&mut seen).await, Seen::Text("reply".to_string()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    push.send(
        "\r\n+CDS: 6,42,\"+15559876543\",145,\"24/10/19,12:00:00+08\",\"24/10/19,12:00:05+08\",0\r\n"
            .to_string(),
    )
    .unwrap();
    let ack = tokio::time::timeout(Duration::from_secs(3), xmpp_rx.recv())
        .await
        .expect("no acknowledgement for the delivered message")
        .expect("translator stopped");
    assert_eq!(ack.receipt_for.as_deref(), Some("orig-1"));
    assert_eq!(ack.to, Jid::new("user", "example.com"));

    translator.abort();
    feed.abort();
}
