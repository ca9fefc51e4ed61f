//! GSM modem provider speaking text-mode AT commands over a serial line.
//!
//! The serial line is either a character device (`serial`) or a serial port
//! exposed over TCP (`serial_tcp`). The inbound feed owns the reader: it routes
//! unsolicited `+CMT`/`+CDS` notifications to the translator and every other line
//! to whichever command is waiting for a response.

use super::at::{self, AtLine};
use super::{ProviderError, SmsProvider};
use crate::sms::{InboundSms, Sms};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// How long a command waits for each response line.
pub const AT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause before a feed gives up on an unreachable modem, so restarts don't spin.
const REOPEN_PAUSE: Duration = Duration::from_secs(2);

const RESPONSE_BUFFER: usize = 16;

/// Longest partial line kept while waiting for its newline.
const MAX_LINE_LEN: usize = 4096;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the modem's serial line is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemTransport {
    /// Serial port exposed over TCP, e.g. `192.168.1.111:7777`.
    SerialTcp(String),
    /// Character device such as `/dev/ttyAMA0`. Line settings are configured outside the process.
    Serial(PathBuf),
}

impl ModemTransport {
    /// Build from the config's `method` (`serial_tcp` or `serial`) and `device`.
    pub fn from_method(method: &str, device: &str) -> Result<Self, ProviderError> {
        match method.trim() {
            "serial_tcp" => Ok(Self::SerialTcp(device.to_string())),
            "serial" => Ok(Self::Serial(PathBuf::from(device))),
            other => Err(ProviderError::Protocol(format!(
                "unknown modem method {:?} (expected serial_tcp or serial)",
                other
            ))),
        }
    }

    async fn open(&self) -> Result<(Reader, Writer), ProviderError> {
        match self {
            Self::SerialTcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                let (r, w) = stream.into_split();
                Ok((Box::new(r), Box::new(w)))
            }
            Self::Serial(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(path)
                    .await?;
                let reader = file.try_clone().await?;
                Ok((Box::new(reader), Box::new(file)))
            }
        }
    }
}

/// Command side of a running modem session.
struct Session {
    writer: Writer,
    responses: mpsc::Receiver<AtLine>,
}

impl Session {
    async fn write_line(&mut self, line: &str) -> Result<(), ProviderError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Drop responses nobody waited for (e.g. a trailing OK after `+CMGS`).
    fn discard_stale(&mut self) {
        while self.responses.try_recv().is_ok() {}
    }

    async fn next(&mut self, timeout: Duration) -> Result<AtLine, ProviderError> {
        match tokio::time::timeout(timeout, self.responses.recv()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(ProviderError::NotConnected),
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    /// Run a command and wait for its final result.
    async fn command(&mut self, line: &str, timeout: Duration) -> Result<(), ProviderError> {
        self.discard_stale();
        self.write_line(line).await?;
        loop {
            match self.next(timeout).await? {
                AtLine::Ok => return Ok(()),
                AtLine::Error(e) => return Err(ProviderError::Modem(e)),
                _ => continue,
            }
        }
    }

    /// `AT+CMGS` round trip. Returns the message reference.
    async fn send(&mut self, sms: &Sms, timeout: Duration) -> Result<String, ProviderError> {
        self.discard_stale();
        self.write_line(&at::send_command(sms.to())).await?;
        loop {
            match self.next(timeout).await? {
                AtLine::Prompt => break,
                AtLine::Error(e) => return Err(ProviderError::Modem(e)),
                _ => continue,
            }
        }
        self.writer.write_all(sms.body().as_bytes()).await?;
        self.writer.write_all(&[at::CTRL_Z]).await?;
        self.writer.flush().await?;
        loop {
            match self.next(timeout).await? {
                AtLine::SendReference(reference) => return Ok(reference),
                AtLine::Error(e) => return Err(ProviderError::Modem(e)),
                AtLine::Ok => {
                    return Err(ProviderError::Protocol(
                        "modem answered OK without a message reference".to_string(),
                    ))
                }
                _ => continue,
            }
        }
    }
}

/// SMS provider backed by a GSM modem.
pub struct ModemProvider {
    transport: ModemTransport,
    /// This modem's own phone number; the `to` of every inbound message.
    own_number: String,
    /// Opened at construction; the first feed run takes it, later runs reopen.
    opened: Mutex<Option<(Reader, Writer)>>,
    session: Mutex<Option<Session>>,
    response_timeout: Duration,
}

impl ModemProvider {
    /// Open the transport. Failure here means the gateway cannot run.
    pub async fn connect(
        transport: ModemTransport,
        own_number: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let opened = transport.open().await?;
        log::info!("modem: opened {:?}", transport);
        Ok(Self {
            transport,
            own_number: own_number.into(),
            opened: Mutex::new(Some(opened)),
            session: Mutex::new(None),
            response_timeout: AT_RESPONSE_TIMEOUT,
        })
    }

    /// Override how long commands wait for each response line.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    async fn take_or_open(&self) -> Result<(Reader, Writer), ProviderError> {
        if let Some(opened) = self.opened.lock().await.take() {
            return Ok(opened);
        }
        self.transport.open().await
    }

    async fn initialize(&self) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        for command in at::INIT_SEQUENCE {
            if let Err(e) = session.command(command, self.response_timeout).await {
                log::warn!("modem: init command {} failed: {}", command, e);
            }
        }
        log::info!("modem: initialized");
    }

    async fn run_session(self: Arc<Self>, deliver_to: mpsc::Sender<InboundSms>) {
        let (reader, writer) = match self.take_or_open().await {
            Ok(io) => io,
            Err(e) => {
                log::warn!("modem: cannot open {:?}: {}", self.transport, e);
                tokio::time::sleep(REOPEN_PAUSE).await;
                return;
            }
        };
        let (responses_tx, responses) = mpsc::channel(RESPONSE_BUFFER);
        *self.session.lock().await = Some(Session { writer, responses });

        let init = self.clone();
        tokio::spawn(async move { init.initialize().await });

        let reason = read_loop(reader, &self.own_number, &deliver_to, &responses_tx).await;
        log::warn!("modem: read loop ended: {}", reason);
        // wake any command still waiting so it can release the session
        drop(responses_tx);
        *self.session.lock().await = None;
    }
}

#[async_trait]
impl SmsProvider for ModemProvider {
    fn name(&self) -> &str {
        "modem"
    }

    async fn send_sms(&self, sms: &Sms) -> Result<String, ProviderError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ProviderError::NotConnected)?;
        let reference = session.send(sms, self.response_timeout).await?;
        log::debug!("modem: sent sms to {} with reference {}", sms.to(), reference);
        Ok(reference)
    }

    fn run_inbound_feed(self: Arc<Self>, deliver_to: mpsc::Sender<InboundSms>) -> JoinHandle<()> {
        log::info!("modem: starting session on {:?}", self.transport);
        tokio::spawn(self.run_session(deliver_to))
    }
}

/// Read lines until the modem goes away. Returns why it stopped.
async fn read_loop(
    mut reader: Reader,
    own_number: &str,
    deliver_to: &mpsc::Sender<InboundSms>,
    responses: &mpsc::Sender<AtLine>,
) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 512];
    // originator of a +CMT whose text is on the next line
    let mut pending_from: Option<String> = None;
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => return "end of stream".to_string(),
            Ok(n) => n,
            Err(e) => return e.to_string(),
        };
        buf.extend_from_slice(&chunk[..n]);
        for line in drain_lines(&mut buf) {
            if let Some(from) = pending_from.take() {
                match Sms::new(own_number, from.as_str(), line) {
                    Ok(sms) => {
                        if deliver_to.send(InboundSms::Message(sms)).await.is_err() {
                            return "translator inbox closed".to_string();
                        }
                    }
                    Err(e) => log::debug!("modem: dropping message from {}: {}", from, e),
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }
            match at::parse_line(&line) {
                AtLine::IncomingHeader { originator } => pending_from = Some(originator),
                AtLine::StatusReport { reference, status } if at::is_delivered(status) => {
                    let report = InboundSms::DeliveryReport { id: reference };
                    if deliver_to.send(report).await.is_err() {
                        return "translator inbox closed".to_string();
                    }
                }
                AtLine::StatusReport { reference, status } => {
                    log::info!("modem: message {} not delivered (status {})", reference, status);
                }
                other => {
                    if responses.try_send(other).is_err() {
                        log::debug!("modem: dropping unclaimed response");
                    }
                }
            }
        }
    }
}

/// Split complete lines off `buf`. A bare `>` prompt (never newline-terminated)
/// counts as a line too.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buf.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&raw).trim().to_string());
    }
    if String::from_utf8_lossy(buf).trim() == ">" {
        buf.clear();
        lines.push(">".to_string());
    } else if buf.len() > MAX_LINE_LEN {
        log::warn!("modem: discarding {} bytes without a line end", buf.len());
        buf.clear();
    }
    lines
}
