//! smsxmpp core library: SMS transport providers, the XMPP link, the message
//! translator and the supervisor that keeps them running.

pub mod channels;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod id;
pub mod provider;
pub mod receipts;
pub mod sms;
pub mod supervisor;
pub mod translator;
pub mod xmpp;
