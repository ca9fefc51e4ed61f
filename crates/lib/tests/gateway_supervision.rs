//! Integration test: the full gateway topology with a scripted SMS provider and an
//! in-memory XMPP link. Checks end-to-end translation in both directions, that a
//! dying unit is restarted alone, and that pending receipts survive a feed restart.

use async_trait::async_trait;
use smsxmpp::channels::Inbox;
use smsxmpp::directory::StaticDirectory;
use smsxmpp::gateway::{Gateway, TRANSPORT_FEED, XMPP_LINK};
use smsxmpp::provider::{ProviderError, SmsProvider};
use smsxmpp::sms::{InboundSms, Sms};
use smsxmpp::supervisor::RestartEvent;
use smsxmpp::translator::TranslatorConfig;
use smsxmpp::xmpp::{ChatMessage, Jid, XmppLink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Provider whose first feed emits `first_run` and then waits for `die`; later feeds
/// emit `later_runs` and stay up. Every send is recorded and answered with `id`.
struct ScriptedProvider {
    id: String,
    first_run: Vec<InboundSms>,
    later_runs: Vec<InboundSms>,
    die: Arc<Notify>,
    feed_runs: AtomicUsize,
    sent: Mutex<Vec<Sms>>,
}

impl ScriptedProvider {
    fn new(id: &str, first_run: Vec<InboundSms>, later_runs: Vec<InboundSms>) -> Self {
        Self {
            id: id.to_string(),
            first_run,
            later_runs,
            die: Arc::new(Notify::new()),
            feed_runs: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<Sms> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_sms(&self, sms: &Sms) -> Result<String, ProviderError> {
        self.sent.lock().unwrap().push(sms.clone());
        Ok(self.id.clone())
    }

    fn run_inbound_feed(self: Arc<Self>, deliver_to: mpsc::Sender<InboundSms>) -> JoinHandle<()> {
        let run = self.feed_runs.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let script = if run == 0 { &self.first_run } else { &self.later_runs };
            for inbound in script.clone() {
                if deliver_to.send(inbound).await.is_err() {
                    return;
                }
            }
            if run == 0 {
                self.die.notified().await;
            } else {
                std::future::pending::<()>().await;
            }
        })
    }
}

/// XMPP link backed by channels: messages pushed on `from_server` reach the gateway,
/// messages the gateway sends come out on `to_server`. The first `failures` runs exit at once.
struct ChannelLink {
    from_server: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ChatMessage>>>,
    to_server: mpsc::UnboundedSender<ChatMessage>,
    failures: usize,
    starts: Mutex<Vec<tokio::time::Instant>>,
}

impl ChannelLink {
    fn new(failures: usize) -> (Self, mpsc::UnboundedSender<ChatMessage>, mpsc::UnboundedReceiver<ChatMessage>) {
        let (server_tx, from_server) = mpsc::unbounded_channel();
        let (to_server, server_rx) = mpsc::unbounded_channel();
        let link = Self {
            from_server: Arc::new(tokio::sync::Mutex::new(from_server)),
            to_server,
            failures,
            starts: Mutex::new(Vec::new()),
        };
        (link, server_tx, server_rx)
    }
}

impl XmppLink for ChannelLink {
    fn run(
        self: Arc<Self>,
        to_gateway: mpsc::Sender<ChatMessage>,
        from_gateway: Inbox<ChatMessage>,
    ) -> JoinHandle<()> {
        let run = {
            let mut starts = self.starts.lock().unwrap();
            starts.push(tokio::time::Instant::now());
            starts.len()
        };
        tokio::spawn(async move {
            if run <= self.failures {
                return;
            }
            let mut from_server = self.from_server.lock().await;
            let mut outbound = from_gateway.lock().await;
            loop {
                tokio::select! {
                    msg = from_server.recv() => match msg {
                        Some(msg) => {
                            if to_gateway.send(msg).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    },
                    msg = outbound.recv() => match msg {
                        Some(msg) => {
                            let _ = self.to_server.send(msg);
                        }
                        None => return,
                    },
                }
            }
        })
    }
}

fn translator_config(target: Option<&str>) -> TranslatorConfig {
    TranslatorConfig {
        domain: "gw.example".to_string(),
        target: target.map(|t| t.parse().unwrap()),
        own_number: "+15550001111".to_string(),
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn inbound_sms_reaches_target_as_chat_message() {
    let sms = Sms::new("+15550001111", "15551234567", "hi").unwrap();
    let provider = Arc::new(ScriptedProvider::new("", vec![InboundSms::Message(sms)], vec![]));
    let (link, _server_tx, mut server_rx) = ChannelLink::new(0);
    let gateway = Gateway::new(
        provider,
        Arc::new(StaticDirectory::default()),
        Arc::new(link),
        translator_config(Some("user@example.com")),
    );
    let running = tokio::spawn(async move { gateway.run().await });

    let msg = next(&mut server_rx).await;
    assert_eq!(msg.to.to_string(), "user@example.com");
    assert_eq!(msg.from.to_string(), "15551234567@gw.example");
    assert_eq!(msg.body, "hi");
    running.abort();
}

#[tokio::test]
async fn pending_receipt_survives_feed_restart() {
    let provider = Arc::new(ScriptedProvider::new(
        "abc123",
        vec![],
        vec![InboundSms::DeliveryReport { id: "abc123".to_string() }],
    ));
    let (link, server_tx, mut server_rx) = ChannelLink::new(0);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let gateway = Gateway::new(
        provider.clone(),
        Arc::new(StaticDirectory::new(HashMap::new(), HashMap::new())),
        Arc::new(link),
        translator_config(Some("user@example.com")),
    )
    .with_restart_events(events_tx);
    let running = tokio::spawn(async move { gateway.run().await });

    let mut msg = ChatMessage::chat(
        "orig-1".to_string(),
        Jid::new("user", "example.com"),
        Jid::new("15559876543", "gw.example"),
        "reply",
    );
    msg.receipt_request = true;
    server_tx.send(msg.clone()).unwrap();

    for _ in 0..100 {
        if !provider.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let sent = provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to(), "15559876543");
    assert_eq!(sent[0].body(), "reply");
    tokio::time::sleep(Duration::from_millis(50)).await;

    provider.die.notify_one();
    let event = next(&mut events).await;
    assert_eq!(
        event,
        RestartEvent {
            unit: TRANSPORT_FEED.to_string(),
            restart: 1
        }
    );

    let ack = next(&mut server_rx).await;
    assert_eq!(ack.to, msg.from);
    assert_eq!(ack.from, msg.to);
    assert_eq!(ack.receipt_for.as_deref(), Some("orig-1"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server_rx.try_recv().is_err(), "exactly one acknowledgement expected");
    assert!(events.try_recv().is_err(), "only the feed should have restarted");
    running.abort();
}

#[tokio::test(start_paused = true)]
async fn xmpp_link_restarts_after_cooldown_alone() {
    let provider = Arc::new(ScriptedProvider::new("", vec![], vec![]));
    let (link, server_tx, mut server_rx) = ChannelLink::new(2);
    let link = Arc::new(link);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let gateway = Gateway::new(
        provider.clone(),
        Arc::new(StaticDirectory::default()),
        link.clone(),
        translator_config(None),
    )
    .with_xmpp_cooldown(Duration::from_secs(1))
    .with_restart_events(events_tx);
    let running = tokio::spawn(async move { gateway.run().await });

    for restart in 1..=2 {
        let event = next(&mut events).await;
        assert_eq!(
            event,
            RestartEvent {
                unit: XMPP_LINK.to_string(),
                restart
            }
        );
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    let starts = link.starts.lock().unwrap().clone();
    assert_eq!(starts.len(), 3);
    assert!(starts[1] - starts[0] >= Duration::from_secs(1));
    assert!(starts[2] - starts[1] >= Duration::from_secs(1));
    assert_eq!(provider.feed_runs.load(Ordering::SeqCst), 1);
    assert!(events.try_recv().is_err());

    // the third link stays up and carries messages
    let msg = ChatMessage::chat(
        "m1".to_string(),
        Jid::new("user", "example.com"),
        Jid::new("15559876543", "gw.example"),
        "after restart",
    );
    server_tx.send(msg).unwrap();
    for _ in 0..100 {
        if !provider.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(provider.sent()[0].body(), "after restart");
    assert!(server_rx.try_recv().is_err());
    running.abort();
}
