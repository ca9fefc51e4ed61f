//! Gateway: wires the SMS provider, XMPP link and translator into a supervisor.
//!
//! Three units run side by side and restart independently: the provider's inbound
//! feed, the XMPP link (after a cooldown) and the translator. They talk only
//! through handoff channels created once here, so messages waiting in a channel
//! survive the death of the unit that would have consumed them.

use crate::channels::handoff;
use crate::config::Config;
use crate::directory::Directory;
use crate::provider::SmsProvider;
use crate::sms::InboundSms;
use crate::supervisor::{RestartEvent, Supervisor};
use crate::translator::{Translator, TranslatorConfig};
use crate::xmpp::{ChatMessage, XmppLink};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const TRANSPORT_FEED: &str = "transport feed";
pub const XMPP_LINK: &str = "xmpp link";
pub const TRANSLATOR: &str = "gateway translator";

pub struct Gateway {
    provider: Arc<dyn SmsProvider>,
    directory: Arc<dyn Directory>,
    link: Arc<dyn XmppLink>,
    translator: Arc<TranslatorConfig>,
    xmpp_cooldown: Duration,
    events: Option<mpsc::UnboundedSender<RestartEvent>>,
}

impl Gateway {
    pub fn new(
        provider: Arc<dyn SmsProvider>,
        directory: Arc<dyn Directory>,
        link: Arc<dyn XmppLink>,
        translator: TranslatorConfig,
    ) -> Self {
        Self {
            provider,
            directory,
            link,
            translator: Arc::new(translator),
            xmpp_cooldown: Duration::from_secs(1),
            events: None,
        }
    }

    /// Build everything from config. Fails when no SMS provider can be built.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let provider = config.sms_provider().await?;
        let translator = config.translator_config()?;
        Ok(Self::new(
            provider,
            Arc::new(config.directory()),
            Arc::new(config.bridge_link()),
            translator,
        )
        .with_xmpp_cooldown(config.xmpp_cooldown()))
    }

    pub fn with_xmpp_cooldown(mut self, cooldown: Duration) -> Self {
        self.xmpp_cooldown = cooldown;
        self
    }

    /// Report unit restarts on `events`.
    pub fn with_restart_events(mut self, events: mpsc::UnboundedSender<RestartEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Create the handoff channels and the supervisor owning the three units.
    pub fn supervisor(&self) -> Supervisor {
        let (sms_tx, sms_inbox) = handoff::<InboundSms>();
        let (to_gateway_tx, to_gateway_inbox) = handoff::<ChatMessage>();
        let (to_xmpp_tx, to_xmpp_inbox) = handoff::<ChatMessage>();

        let provider = self.provider.clone();
        let feed = move || provider.clone().run_inbound_feed(sms_tx.clone());

        let link = self.link.clone();
        let xmpp = move || link.clone().run(to_gateway_tx.clone(), to_xmpp_inbox.clone());

        let config = self.translator.clone();
        let provider = self.provider.clone();
        let directory = self.directory.clone();
        let translator = move || {
            Translator::new(
                config.clone(),
                provider.clone(),
                directory.clone(),
                to_xmpp_tx.clone(),
            )
            .spawn(sms_inbox.clone(), to_gateway_inbox.clone())
        };

        let supervisor = Supervisor::new()
            .unit(TRANSPORT_FEED, Duration::ZERO, feed)
            .unit(XMPP_LINK, self.xmpp_cooldown, xmpp)
            .unit(TRANSLATOR, Duration::ZERO, translator);
        match &self.events {
            Some(events) => supervisor.with_events(events.clone()),
            None => supervisor,
        }
    }

    /// Run until the process ends.
    pub async fn run(&self) {
        log::info!(
            "gateway: {} via {}, xmpp cooldown {:?}",
            self.translator.domain,
            self.provider.name(),
            self.xmpp_cooldown
        );
        self.supervisor().run().await
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
