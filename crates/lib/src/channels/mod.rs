//! Channels connecting the gateway's processes.
//!
//! Every cross-process hop (provider feed → translator, XMPP link → translator,
//! translator → XMPP link) is a bounded handoff channel whose receiving end is an
//! [`Inbox`], so a restarted consumer picks up where the dead one left off.

mod inbox;

pub use inbox::{handoff, Inbox, HANDOFF_CAPACITY};
