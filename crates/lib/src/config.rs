//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.smsxmpp/config.json`) and environment.
//! Every section has defaults, so a missing file yields a config that fails only
//! when something actually needs the missing piece (the SMS provider, the domain).

use crate::directory::StaticDirectory;
use crate::provider::{HttpGatewayProvider, ModemProvider, ModemTransport, SmsProvider};
use crate::translator::TranslatorConfig;
use crate::xmpp::{BridgeLink, Jid};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// XMPP server and component settings.
    #[serde(default)]
    pub xmpp: XmppConfig,

    /// GSM modem transport. Preferred over `httpGateway` when both are set.
    #[serde(default)]
    pub modem: Option<ModemConfig>,

    /// HTTP SMS-gateway transport (send only).
    #[serde(default)]
    pub http_gateway: Option<HttpGatewayConfig>,

    /// XMPP address (`local@domain`) -> phone number.
    #[serde(default)]
    pub users: HashMap<String, String>,

    /// Phone number -> XMPP address. Checked before the inverse of `users`.
    #[serde(default)]
    pub phones: HashMap<String, String>,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// XMPP server connection and component identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmppConfig {
    /// XMPP server host (default "127.0.0.1").
    #[serde(default = "default_xmpp_host")]
    pub host: String,

    /// Component port on the XMPP server (default 5347).
    #[serde(default = "default_xmpp_port")]
    pub port: u16,

    /// Component domain; SMS contacts appear as `<number>@<domain>`.
    #[serde(default)]
    pub domain: String,

    /// Component shared secret. Overridden by SMSXMPP_XMPP_SECRET env.
    pub secret: Option<String>,

    /// Deliver every inbound SMS to this address. When absent, the directory decides.
    pub jid: Option<String>,

    /// Address of the XMPP component bridge (default "127.0.0.1:5380").
    #[serde(default = "default_bridge_addr")]
    pub bridge: String,
}

fn default_xmpp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_xmpp_port() -> u16 {
    5347
}

fn default_bridge_addr() -> String {
    "127.0.0.1:5380".to_string()
}

impl Default for XmppConfig {
    fn default() -> Self {
        Self {
            host: default_xmpp_host(),
            port: default_xmpp_port(),
            domain: String::new(),
            secret: None,
            jid: None,
            bridge: default_bridge_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemConfig {
    /// "serial_tcp" (device is host:port) or "serial" (device is a path).
    #[serde(default = "default_modem_method")]
    pub method: String,

    pub device: String,

    /// The modem's own phone number.
    #[serde(default)]
    pub own_number: String,
}

fn default_modem_method() -> String {
    "serial_tcp".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGatewayConfig {
    /// Gateway daemon base URL (default http://127.0.0.1:13013).
    pub base_url: Option<String>,

    #[serde(default)]
    pub username: String,

    /// Overridden by SMSXMPP_HTTP_PASSWORD env.
    pub password: Option<String>,

    /// Sender number for outbound messages, if the daemon needs one.
    #[serde(default)]
    pub own_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Delay before relaunching a dead XMPP link, in milliseconds (default 1000).
    #[serde(default = "default_xmpp_cooldown_ms")]
    pub xmpp_cooldown_ms: u64,
}

fn default_xmpp_cooldown_ms() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            xmpp_cooldown_ms: default_xmpp_cooldown_ms(),
        }
    }
}

/// Env value if set and non-empty, else the trimmed config value if non-empty.
fn env_or_config(env_value: Option<String>, config_value: Option<&String>) -> Option<String> {
    env_value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            config_value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the component secret: env SMSXMPP_XMPP_SECRET overrides config.
pub fn resolve_xmpp_secret(config: &Config) -> Option<String> {
    env_or_config(
        std::env::var("SMSXMPP_XMPP_SECRET").ok(),
        config.xmpp.secret.as_ref(),
    )
}

/// Resolve the HTTP gateway password: env SMSXMPP_HTTP_PASSWORD overrides config.
pub fn resolve_http_password(config: &Config) -> Option<String> {
    env_or_config(
        std::env::var("SMSXMPP_HTTP_PASSWORD").ok(),
        config
            .http_gateway
            .as_ref()
            .and_then(|h| h.password.as_ref()),
    )
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SMSXMPP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".smsxmpp").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, SMSXMPP_CONFIG_PATH or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

impl Config {
    /// Which transport `sms_provider` would build, without opening it.
    pub fn provider_kind(&self) -> Option<&'static str> {
        if self.modem.is_some() {
            Some("modem")
        } else if self.http_gateway.is_some() {
            Some("http-gateway")
        } else {
            None
        }
    }

    /// Build the configured SMS provider. The modem transport is opened here, so
    /// an unreachable modem is an error.
    pub async fn sms_provider(&self) -> Result<Arc<dyn SmsProvider>> {
        if let Some(modem) = &self.modem {
            let transport = ModemTransport::from_method(&modem.method, &modem.device)?;
            let provider = ModemProvider::connect(transport, modem.own_number.as_str())
                .await
                .with_context(|| format!("opening modem {}", modem.device))?;
            return Ok(Arc::new(provider));
        }
        if let Some(http) = &self.http_gateway {
            let password = resolve_http_password(self).unwrap_or_default();
            return Ok(Arc::new(HttpGatewayProvider::new(
                http.base_url.clone(),
                http.username.as_str(),
                password,
            )));
        }
        bail!("need to configure an SMS provider (modem or httpGateway)")
    }

    /// Fixed delivery target for inbound SMS, if configured.
    pub fn target_jid(&self) -> Result<Option<Jid>> {
        match self.xmpp.jid.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(jid) => jid
                .parse()
                .map(Some)
                .with_context(|| format!("parsing xmpp.jid {:?}", jid)),
        }
    }

    /// Our own phone number, used as the sender of outbound SMS.
    pub fn own_number(&self) -> String {
        self.modem
            .as_ref()
            .map(|m| m.own_number.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| self.http_gateway.as_ref().map(|h| h.own_number.clone()))
            .unwrap_or_default()
    }

    pub fn xmpp_cooldown(&self) -> Duration {
        Duration::from_millis(self.supervisor.xmpp_cooldown_ms)
    }

    pub fn directory(&self) -> StaticDirectory {
        StaticDirectory::new(self.users.clone(), self.phones.clone())
    }

    pub fn translator_config(&self) -> Result<TranslatorConfig> {
        let domain = self.xmpp.domain.trim();
        if domain.is_empty() {
            bail!("xmpp.domain is not configured");
        }
        Ok(TranslatorConfig {
            domain: domain.to_string(),
            target: self.target_jid()?,
            own_number: self.own_number(),
        })
    }

    pub fn bridge_link(&self) -> BridgeLink {
        BridgeLink::new(
            self.xmpp.bridge.as_str(),
            format!("{}:{}", self.xmpp.host, self.xmpp.port),
            self.xmpp.domain.trim(),
            resolve_xmpp_secret(self).unwrap_or_default(),
        )
    }
}
