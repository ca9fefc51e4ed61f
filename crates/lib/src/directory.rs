//! Address directory: maps XMPP addresses to phone numbers and back.

use crate::xmpp::Jid;
use std::collections::HashMap;

/// Outcome of a directory lookup. `Ignored` means the message should be dropped
/// silently, as if it never happened; it is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Mapped(T),
    Ignored,
}

pub trait Directory: Send + Sync {
    fn address_to_phone(&self, address: &Jid) -> Lookup<String>;
    fn phone_to_address(&self, phone: &str) -> Lookup<Jid>;
}

/// Directory backed by the `users` and `phones` tables of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    /// `local@domain` -> phone number.
    users: HashMap<String, String>,
    /// phone number -> `local@domain`. Consulted before the inverse of `users`.
    phones: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(users: HashMap<String, String>, phones: HashMap<String, String>) -> Self {
        Self { users, phones }
    }

    /// Number of explicit mappings (users + phones).
    pub fn len(&self) -> usize {
        self.users.len() + self.phones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for StaticDirectory {
    fn address_to_phone(&self, address: &Jid) -> Lookup<String> {
        if let Some(phone) = self.users.get(&address.to_string()) {
            return Lookup::Mapped(phone.clone());
        }
        // the local part may itself be a phone number
        if looks_like_phone(&address.local) {
            return Lookup::Mapped(address.local.clone());
        }
        Lookup::Ignored
    }

    fn phone_to_address(&self, phone: &str) -> Lookup<Jid> {
        let jid = self.phones.get(phone).map(String::as_str).or_else(|| {
            self.users
                .iter()
                .find(|(_, p)| p.as_str() == phone)
                .map(|(jid, _)| jid.as_str())
        });
        let Some(jid) = jid else {
            return Lookup::Ignored;
        };
        match jid.parse() {
            Ok(jid) => Lookup::Mapped(jid),
            Err(e) => {
                log::warn!("directory: bad address for {}: {}", phone, e);
                Lookup::Ignored
            }
        }
    }
}

/// Contains a run of at least nine digits.
fn looks_like_phone(s: &str) -> bool {
    s.split(|c: char| !c.is_ascii_digit())
        .any(|run| run.len() >= 9)
}
