//! Pending delivery receipts, keyed by the provider's outgoing SMS id.
//!
//! Owned by the translator task alone, so there is no locking here. Receipts are
//! best effort: when the registry is full it is emptied before the next insert.

use crate::xmpp::ChatMessage;
use std::collections::HashMap;

/// Most receipts held at once.
pub const RECEIPT_CAPACITY: usize = 10;

#[derive(Debug)]
pub struct PendingReceipts {
    /// provider message id -> acknowledgement to send once that SMS is delivered
    entries: HashMap<String, ChatMessage>,
    capacity: usize,
}

impl Default for PendingReceipts {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingReceipts {
    pub fn new() -> Self {
        Self::with_capacity(RECEIPT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Remember `ack` until `provider_id` is reported delivered. If the registry is
    /// full, every pending receipt is dropped first. Returns true when that happened.
    pub fn insert(&mut self, provider_id: String, ack: ChatMessage) -> bool {
        let overflow =
            !self.entries.contains_key(&provider_id) && self.entries.len() >= self.capacity;
        if overflow {
            log::warn!(
                "receipts: registry full ({} pending), dropping all pending receipts",
                self.entries.len()
            );
            self.entries.clear();
        }
        self.entries.insert(provider_id, ack);
        overflow
    }

    /// Remove and return the acknowledgement waiting on `provider_id`.
    pub fn take(&mut self, provider_id: &str) -> Option<ChatMessage> {
        self.entries.remove(provider_id)
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.entries.contains_key(provider_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
