//! XMPP addresses (`local@domain`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum JidError {
    #[error("address is empty")]
    Empty,
    #[error("address {0:?} has no domain part")]
    MissingDomain(String),
    #[error("address {0:?} has an empty local part")]
    EmptyLocal(String),
}

/// A bare JID. The resource part, if any, is dropped when parsing.
/// `local` is empty for domain-only addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub local: String,
    pub domain: String,
}

impl Jid {
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(JidError::Empty);
        }
        let bare = s.split_once('/').map_or(s, |(bare, _)| bare);
        match bare.split_once('@') {
            Some(("", _)) => Err(JidError::EmptyLocal(s.to_string())),
            Some((_, "")) => Err(JidError::MissingDomain(s.to_string())),
            Some((local, domain)) => Ok(Jid::new(local, domain)),
            None if bare.is_empty() => Err(JidError::MissingDomain(s.to_string())),
            None => Ok(Jid::new("", bare)),
        }
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local.is_empty() {
            f.write_str(&self.domain)
        } else {
            write!(f, "{}@{}", self.local, self.domain)
        }
    }
}
