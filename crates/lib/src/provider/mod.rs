//! SMS transport providers.
//!
//! A provider sends single messages and runs an inbound feed that pushes what it
//! hears from the SMS network onto the translator's inbox. Two backends: an AT
//! command modem and an HTTP SMS-gateway daemon.

mod at;
mod http_gateway;
mod modem;

pub use at::{parse_line, AtLine};
pub use http_gateway::{HttpGatewayProvider, DEFAULT_HTTP_GATEWAY_URL};
pub use modem::{ModemProvider, ModemTransport, AT_RESPONSE_TIMEOUT};

use crate::sms::{InboundSms, Sms};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("sms gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sms gateway rejected message: {0}")]
    Rejected(String),
    #[error("modem i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("modem returned error: {0}")]
    Modem(String),
    #[error("timed out waiting for modem response")]
    Timeout,
    #[error("modem session is not running")]
    NotConnected,
    #[error("{0}")]
    Protocol(String),
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Short name for logs (e.g. "modem").
    fn name(&self) -> &str;

    /// Send one message. Returns the provider's id for it (used to match delivery reports).
    async fn send_sms(&self, sms: &Sms) -> Result<String, ProviderError>;

    /// Start the inbound feed. The returned handle resolves when the feed dies.
    fn run_inbound_feed(self: Arc<Self>, deliver_to: mpsc::Sender<InboundSms>) -> JoinHandle<()>;
}
