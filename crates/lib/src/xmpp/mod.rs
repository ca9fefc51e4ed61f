//! XMPP side of the gateway: addresses, chat message stanzas and the link contract.
//!
//! The XML wire protocol lives outside this crate. A link only moves parsed
//! [`ChatMessage`] values between the XMPP server and the gateway's handoff channels.

mod bridge;
mod jid;

pub use bridge::BridgeLink;
pub use jid::{Jid, JidError};

use crate::channels::Inbox;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A chat message stanza, optionally requesting or acknowledging a delivery receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub from: Jid,
    pub to: Jid,
    #[serde(default)]
    pub body: String,
    /// Sender asked for a delivery receipt.
    #[serde(default)]
    pub receipt_request: bool,
    /// Id of the stanza this message acknowledges as delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_for: Option<String>,
}

impl ChatMessage {
    pub fn chat(id: String, from: Jid, to: Jid, body: impl Into<String>) -> Self {
        Self {
            id,
            from,
            to,
            body: body.into(),
            receipt_request: false,
            receipt_for: None,
        }
    }

    /// Build the receipt acknowledging this message: addressed back to the
    /// sender, from the original recipient.
    pub fn receipt_ack(&self, id: String) -> Self {
        Self {
            id,
            from: self.to.clone(),
            to: self.from.clone(),
            body: String::new(),
            receipt_request: false,
            receipt_for: Some(self.id.clone()),
        }
    }
}

/// A long-lived connection to the XMPP server.
pub trait XmppLink: Send + Sync {
    /// Start the link. Messages from the server go to `to_gateway`; messages
    /// taken from `from_gateway` go to the server. The returned handle resolves
    /// when the link dies for any reason.
    fn run(
        self: Arc<Self>,
        to_gateway: mpsc::Sender<ChatMessage>,
        from_gateway: Inbox<ChatMessage>,
    ) -> JoinHandle<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_ack_swaps_addresses_and_references_original() {
        let mut msg = ChatMessage::chat(
            "orig".to_string(),
            Jid::new("user", "example.com"),
            Jid::new("15559876543", "gw.example"),
            "reply",
        );
        msg.receipt_request = true;
        let ack = msg.receipt_ack("ack".to_string());
        assert_eq!(ack.from, msg.to);
        assert_eq!(ack.to, msg.from);
        assert_eq!(ack.receipt_for.as_deref(), Some("orig"));
        assert!(ack.body.is_empty());
        assert!(!ack.receipt_request);
    }

    #[test]
    fn deserializes_with_defaults() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"id":"1","from":"user@example.com","to":"15559876543@gw.example","receiptRequest":true}"#,
        )
        .unwrap();
        assert_eq!(msg.body, "");
        assert!(msg.receipt_request);
        assert_eq!(msg.receipt_for, None);
    }
}
