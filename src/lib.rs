//! Store-and-forward messaging library (the `sigmail` service)
//!
//! A small mail system over plain TCP: a server that keeps user
//! accounts and messages in a JSON snapshot file, and a client that
//! mirrors its mailbox in a local per-user cache. Commands and
//! responses are single text lines carried in length-prefixed JSON
//! frames.
//!
//! [`MailServer`] is the serving side, [`MailClient`] the high-level
//! client; [`MailSession`] is the bare request/reply transport for
//! callers that want to speak the protocol directly.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;

pub use cache::{CacheState, Draft, SyncOutcome};
pub use client::MailClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use protocol::{Command, InboxEntry, MessageView, Response, SentEntry, Status};
pub use server::MailServer;
pub use session::MailSession;
pub use store::MailStore;
