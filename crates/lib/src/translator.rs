//! Gateway translator: the only process that touches both SMS and XMPP.
//!
//! Inbound SMS become chat messages for the XMPP link; chat messages become SMS
//! handed to the provider. Delivery receipts are correlated through
//! [`PendingReceipts`], which lives inside the translator task and is never shared.

use crate::channels::Inbox;
use crate::directory::{Directory, Lookup};
use crate::id;
use crate::provider::{ProviderError, SmsProvider};
use crate::receipts::PendingReceipts;
use crate::sms::{InboundSms, Sms};
use crate::xmpp::{ChatMessage, Jid};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("sending sms to {to}: {source}")]
    Provider {
        to: String,
        #[source]
        source: ProviderError,
    },
    #[error("generating stanza id: {0}")]
    Id(#[from] getrandom::Error),
}

/// Settings the translator needs from the config.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Component domain; inbound SMS appear to come from `<number>@<domain>`.
    pub domain: String,
    /// Where inbound SMS are delivered. When None, the directory decides per number.
    pub target: Option<Jid>,
    /// Our own phone number: the `from` of outbound SMS.
    pub own_number: String,
}

/// An SMS the provider accepted, waiting to be recorded by the translator task.
struct Sent {
    msg: ChatMessage,
    to: String,
    provider_id: String,
}

async fn send(provider: &dyn SmsProvider, sms: &Sms) -> Result<String, GatewayError> {
    provider
        .send_sms(sms)
        .await
        .map_err(|source| GatewayError::Provider {
            to: sms.to().to_string(),
            source,
        })
}

pub struct Translator {
    config: Arc<TranslatorConfig>,
    provider: Arc<dyn SmsProvider>,
    directory: Arc<dyn Directory>,
    xmpp_tx: mpsc::Sender<ChatMessage>,
    receipts: PendingReceipts,
}

impl Translator {
    pub fn new(
        config: Arc<TranslatorConfig>,
        provider: Arc<dyn SmsProvider>,
        directory: Arc<dyn Directory>,
        xmpp_tx: mpsc::Sender<ChatMessage>,
    ) -> Self {
        Self {
            config,
            provider,
            directory,
            xmpp_tx,
            receipts: PendingReceipts::new(),
        }
    }

    pub fn pending_receipts(&self) -> &PendingReceipts {
        &self.receipts
    }

    /// Build the chat message for an inbound SMS. None when the directory says to ignore it.
    pub fn translate_inbound(&self, sms: &Sms) -> Result<Option<ChatMessage>, GatewayError> {
        let to = match &self.config.target {
            Some(target) => target.clone(),
            None => match self.directory.phone_to_address(sms.to()) {
                Lookup::Mapped(jid) => jid,
                Lookup::Ignored => return Ok(None),
            },
        };
        let from = Jid::new(sms.from(), self.config.domain.as_str());
        Ok(Some(ChatMessage::chat(id::new_id()?, from, to, sms.body())))
    }

    /// Build the SMS for a chat message. None for messages without a body
    /// (receipts, chat states) and for foreign addresses the directory ignores.
    /// Addresses in the gateway domain fall back to their local part as the number.
    pub fn translate_outbound(&self, msg: &ChatMessage) -> Option<Sms> {
        if msg.body.is_empty() {
            log::debug!("translator: skipping message {} without body", msg.id);
            return None;
        }
        let to = match self.directory.address_to_phone(&msg.to) {
            Lookup::Mapped(phone) => phone,
            Lookup::Ignored if msg.to.domain == self.config.domain && !msg.to.local.is_empty() => {
                msg.to.local.clone()
            }
            Lookup::Ignored => {
                log::debug!("translator: ignoring message to {}", msg.to);
                return None;
            }
        };
        Sms::new(to, self.config.own_number.as_str(), msg.body.as_str()).ok()
    }

    /// Send a chat message as SMS and wait for the provider. A failed send is
    /// returned and the message dropped.
    pub async fn forward_outbound(&mut self, msg: ChatMessage) -> Result<(), GatewayError> {
        let Some(sms) = self.translate_outbound(&msg) else {
            return Ok(());
        };
        let provider_id = send(self.provider.as_ref(), &sms).await?;
        self.record_sent(Sent {
            msg,
            to: sms.to().to_string(),
            provider_id,
        })
    }

    /// Like [`forward_outbound`](Self::forward_outbound), but the send runs on its own
    /// task so the translator keeps draining its inboxes meanwhile. The outcome comes
    /// back on `sent_tx` and is recorded by the translator task.
    fn dispatch_outbound(&self, msg: ChatMessage, sent_tx: mpsc::UnboundedSender<Sent>) {
        let Some(sms) = self.translate_outbound(&msg) else {
            return;
        };
        let provider = self.provider.clone();
        tokio::spawn(async move {
            match send(provider.as_ref(), &sms).await {
                Ok(provider_id) => {
                    let sent = Sent {
                        msg,
                        to: sms.to().to_string(),
                        provider_id,
                    };
                    if sent_tx.send(sent).is_err() {
                        log::warn!("translator: stopped before sms to {} was recorded", sms.to());
                    }
                }
                Err(e) => log::warn!("translator: {}", e),
            }
        });
    }

    /// Log an accepted SMS and register its receipt, if one was requested.
    fn record_sent(&mut self, sent: Sent) -> Result<(), GatewayError> {
        log::info!(
            "translator: sms from {} to {} sent via {} (id {})",
            sent.msg.from,
            sent.to,
            self.provider.name(),
            sent.provider_id
        );
        if sent.msg.receipt_request && !sent.provider_id.is_empty() {
            let ack = sent.msg.receipt_ack(id::new_id()?);
            self.receipts.insert(sent.provider_id, ack);
        }
        Ok(())
    }

    /// The provider reports `provider_id` delivered: release its receipt, if any.
    /// Returns whether a receipt was waiting.
    pub fn deliver_receipt(&mut self, provider_id: &str) -> bool {
        match self.receipts.take(provider_id) {
            Some(ack) => {
                log::debug!("translator: delivery receipt for {} to {}", provider_id, ack.to);
                self.hand_to_xmpp(ack);
                true
            }
            None => false,
        }
    }

    /// Queue a message for the XMPP link without waiting on it.
    fn hand_to_xmpp(&self, msg: ChatMessage) {
        let tx = self.xmpp_tx.clone();
        tokio::spawn(async move {
            let id = msg.id.clone();
            if tx.send(msg).await.is_err() {
                log::warn!("translator: xmpp outbox closed, dropped message {}", id);
            }
        });
    }

    async fn handle_sms(&mut self, inbound: InboundSms) {
        match inbound {
            InboundSms::Message(sms) => match self.translate_inbound(&sms) {
                Ok(Some(msg)) => {
                    log::info!("translator: sms from {} to {}", sms.from(), msg.to);
                    self.hand_to_xmpp(msg);
                }
                Ok(None) => log::debug!("translator: ignoring sms to {}", sms.to()),
                Err(e) => log::warn!("translator: {}", e),
            },
            InboundSms::DeliveryReport { id } => {
                self.deliver_receipt(&id);
            }
        }
    }

    /// Translator loop. Runs until either inbox is closed.
    pub async fn run(mut self, sms_inbox: Inbox<InboundSms>, xmpp_inbox: Inbox<ChatMessage>) {
        let mut sms_rx = sms_inbox.lock().await;
        let mut xmpp_rx = xmpp_inbox.lock().await;
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        log::info!("translator: running");
        loop {
            tokio::select! {
                // accepted sends first, so a fast delivery report finds its receipt
                biased;
                sent = sent_rx.recv() => {
                    if let Some(sent) = sent {
                        if let Err(e) = self.record_sent(sent) {
                            log::warn!("translator: {}", e);
                        }
                    }
                },
                inbound = sms_rx.recv() => match inbound {
                    Some(inbound) => self.handle_sms(inbound).await,
                    None => break,
                },
                msg = xmpp_rx.recv() => match msg {
                    Some(msg) => self.dispatch_outbound(msg, sent_tx.clone()),
                    None => break,
                },
            }
        }
        log::warn!("translator: inbox closed, stopping");
    }

    pub fn spawn(self, sms_inbox: Inbox<InboundSms>, xmpp_inbox: Inbox<ChatMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(sms_inbox, xmpp_inbox))
    }
}
