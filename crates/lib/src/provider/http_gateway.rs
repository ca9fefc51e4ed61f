//! HTTP SMS-gateway provider (Kannel-style `sendsms` endpoint).
//!
//! Send-only: the daemon offers no inbound polling, so the inbound feed idles forever.

use super::{ProviderError, SmsProvider};
use crate::sms::{InboundSms, Sms};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_HTTP_GATEWAY_URL: &str = "http://127.0.0.1:13013";
const SEND_PATH: &str = "/cgi-bin/sendsms";

/// Client for a local SMS-gateway daemon.
#[derive(Clone)]
pub struct HttpGatewayProvider {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl HttpGatewayProvider {
    pub fn new(
        base_url: Option<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_GATEWAY_URL.to_string());
        Self {
            base_url,
            username: username.into(),
            password: password.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SmsProvider for HttpGatewayProvider {
    fn name(&self) -> &str {
        "http-gateway"
    }

    /// GET {base}/cgi-bin/sendsms. The daemon returns no message id, so a local
    /// correlation id is generated for every accepted message.
    async fn send_sms(&self, sms: &Sms) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, SEND_PATH);
        let res = self
            .client
            .get(&url)
            .query(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("to", sms.to()),
                ("text", sms.body()),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{} {}", status, body.trim())));
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        log::debug!("http gateway: accepted sms to {} as {}", sms.to(), id);
        Ok(id)
    }

    fn run_inbound_feed(self: Arc<Self>, _deliver_to: mpsc::Sender<InboundSms>) -> JoinHandle<()> {
        log::info!("http gateway: inbound sms is not supported by this provider; feed idles");
        tokio::spawn(std::future::pending::<()>())
    }
}
