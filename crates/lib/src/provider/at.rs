//! Text-mode AT command subset for GSM modems: sending, receiving and status reports.

/// Terminates the message text after the `>` prompt of `AT+CMGS`.
pub(crate) const CTRL_Z: u8 = 0x1a;

/// Echo off, text mode, request status reports, route new messages (`+CMT`) and
/// status reports (`+CDS`) straight to the terminal.
pub(crate) const INIT_SEQUENCE: &[&str] = &[
    "ATE0",
    "AT+CMGF=1",
    "AT+CSMP=49,167,0,0",
    "AT+CNMI=2,2,0,1,0",
];

/// One response line (or the send prompt) read from the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtLine {
    Ok,
    Error(String),
    /// `>`: the modem is waiting for message text.
    Prompt,
    /// `+CMGS: <mr>`: message accepted, with its reference.
    SendReference(String),
    /// `+CMT: "<oa>",...`: header of an incoming message; the text follows on the next line.
    IncomingHeader { originator: String },
    /// `+CDS: <fo>,<mr>,...,<st>`: status report for an earlier message.
    StatusReport { reference: String, status: u8 },
    Other(String),
}

impl AtLine {
    /// Final result of a command (as opposed to intermediate or unsolicited lines).
    pub fn is_final(&self) -> bool {
        matches!(self, AtLine::Ok | AtLine::Error(_))
    }
}

/// Classify a trimmed line from the modem.
pub fn parse_line(line: &str) -> AtLine {
    let line = line.trim();
    match line {
        "OK" => return AtLine::Ok,
        "ERROR" => return AtLine::Error(line.to_string()),
        ">" => return AtLine::Prompt,
        _ => {}
    }
    if line.starts_with("+CMS ERROR") || line.starts_with("+CME ERROR") {
        return AtLine::Error(line.to_string());
    }
    if let Some(rest) = line.strip_prefix("+CMGS:") {
        return AtLine::SendReference(rest.trim().to_string());
    }
    if let Some(rest) = line.strip_prefix("+CMT:") {
        if let Some(originator) = split_fields(rest).into_iter().next() {
            return AtLine::IncomingHeader { originator };
        }
    }
    if let Some(rest) = line.strip_prefix("+CDS:") {
        let fields = split_fields(rest);
        let status = fields.last().and_then(|s| s.parse::<u8>().ok());
        if let (Some(reference), Some(status)) = (fields.get(1), status) {
            return AtLine::StatusReport {
                reference: reference.clone(),
                status,
            };
        }
    }
    AtLine::Other(line.to_string())
}

/// Status codes 0..=31 mean the short message was delivered (3GPP TS 23.040 TP-Status).
pub(crate) fn is_delivered(status: u8) -> bool {
    status < 32
}

/// `AT+CMGS` for a destination number, in international format.
pub(crate) fn send_command(destination: &str) -> String {
    format!("AT+CMGS=\"{}\",145", destination.trim_start_matches('+'))
}

/// Split a comma-separated parameter list, honouring double quotes. Quotes are removed.
fn split_fields(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in s.trim().chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}
