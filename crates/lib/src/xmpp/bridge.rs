//! Bridge link: exchanges chat messages with an external XMPP component bridge
//! as newline-delimited JSON over TCP.
//!
//! The bridge owns the XMPP stream (component handshake, stanza XML). On connect we
//! send a `hello` frame carrying the server address, component domain and shared
//! secret; after that every line is a `message` frame in either direction.

use super::{ChatMessage, XmppLink};
use crate::channels::Inbox;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Frame {
    Hello {
        server: String,
        domain: String,
        secret: String,
    },
    Message(ChatMessage),
}

/// Link to an XMPP component bridge listening on `bridge` (host:port).
pub struct BridgeLink {
    bridge: String,
    server: String,
    domain: String,
    secret: String,
}

impl BridgeLink {
    pub fn new(
        bridge: impl Into<String>,
        server: impl Into<String>,
        domain: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            bridge: bridge.into(),
            server: server.into(),
            domain: domain.into(),
            secret: secret.into(),
        }
    }

    fn hello(&self) -> Frame {
        Frame::Hello {
            server: self.server.clone(),
            domain: self.domain.clone(),
            secret: self.secret.clone(),
        }
    }

    /// One connection's lifetime. Returns Ok on a clean close by the bridge.
    async fn session(
        &self,
        to_gateway: mpsc::Sender<ChatMessage>,
        from_gateway: Inbox<ChatMessage>,
    ) -> Result<()> {
        let stream = TcpStream::connect(&self.bridge)
            .await
            .with_context(|| format!("connecting to xmpp bridge {}", self.bridge))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        write_frame(&mut write_half, &self.hello()).await?;
        log::info!("xmpp bridge: connected to {} as {}", self.bridge, self.domain);

        let mut outbound = from_gateway.lock().await;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("reading from xmpp bridge")? else {
                        log::info!("xmpp bridge: connection closed by {}", self.bridge);
                        return Ok(());
                    };
                    if let Some(msg) = parse_line(&line) {
                        if to_gateway.send(msg).await.is_err() {
                            anyhow::bail!("gateway inbox closed");
                        }
                    }
                }
                msg = outbound.recv() => {
                    let Some(msg) = msg else {
                        anyhow::bail!("gateway outbox closed");
                    };
                    let id = msg.id.clone();
                    write_frame(&mut write_half, &Frame::Message(msg))
                        .await
                        .with_context(|| format!("writing message {} to xmpp bridge", id))?;
                }
            }
        }
    }
}

impl XmppLink for BridgeLink {
    fn run(
        self: Arc<Self>,
        to_gateway: mpsc::Sender<ChatMessage>,
        from_gateway: Inbox<ChatMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.session(to_gateway, from_gateway).await {
                log::warn!("xmpp bridge: {:#}", e);
            }
        })
    }
}

/// Decode one line from the bridge. Blank, malformed and non-message lines yield None.
fn parse_line(line: &str) -> Option<ChatMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Frame>(line) {
        Ok(Frame::Message(msg)) => Some(msg),
        Ok(Frame::Hello { .. }) => {
            log::debug!("xmpp bridge: ignoring hello frame from bridge");
            None
        }
        Err(e) => {
            log::warn!("xmpp bridge: skipping malformed line: {}", e);
            None
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let mut line = serde_json::to_string(frame).context("encoding bridge frame")?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
