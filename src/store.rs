//! In-process mail store and snapshot persistence
//!
//! The store is the single source of truth for users and messages.
//! All access is serialized by the server (one handler runs to
//! completion before the next), so the store itself needs no internal
//! locking. Every mutating operation pushes a whole-state snapshot
//! through the [`SnapshotSink`] before reporting success; there is no
//! write-ahead log, so a crash between mutation and snapshot loses
//! exactly that mutation.

use crate::error::Result;
use crate::protocol::{InboxEntry, SentEntry, sanitize_subject, timestamp_now};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

pub type MessageId = u64;

/// A stored message. Mutated only to flip the read flag; deleted
/// physically; its id is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub timestamp: String,
    pub read: bool,
}

/// Domain failures. `Display` strings are the exact texts placed
/// after the `ERROR|` token on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Username already exists")]
    AlreadyExists,

    #[error("Username not found")]
    UserNotFound,

    #[error("Invalid password")]
    WrongPassword,

    #[error("Recipient not found")]
    RecipientNotFound,

    #[error("Email not found")]
    MessageNotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Failed to save data: {0}")]
    Persist(String),
}

/// The whole durable state, rewritten in full on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub users: BTreeMap<String, String>,
    pub emails: Vec<Message>,
    pub email_id_counter: u64,
}

/// Durability port for the store. Injectable so tests can count
/// snapshot writes without touching a filesystem.
pub trait SnapshotSink: Send {
    /// Persist the full snapshot, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot could not be written.
    fn persist(&mut self, snapshot: &StoreSnapshot) -> Result<()>;
}

/// Whole-file JSON snapshot sink, the production durability sink.
#[derive(Debug)]
pub struct JsonSnapshotFile {
    path: PathBuf,
}

impl JsonSnapshotFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the snapshot at startup. A missing file means a fresh
    /// start; a corrupted file is logged and also starts fresh.
    #[must_use]
    pub fn load(&self) -> StoreSnapshot {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            info!(path = %self.path.display(), "No database found, starting fresh");
            return StoreSnapshot::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Database corrupted, starting fresh");
            StoreSnapshot::default()
        })
    }
}

impl SnapshotSink for JsonSnapshotFile {
    fn persist(&mut self, snapshot: &StoreSnapshot) -> Result<()> {
        let raw = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// In-memory sink recording every snapshot write. Cloning yields a
/// handle onto the same log, so a test can keep one half and hand the
/// other to the store, then assert "exactly one snapshot write per
/// mutating call".
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotSink {
    state: Arc<Mutex<SinkState>>,
}

#[derive(Debug, Default)]
struct SinkState {
    writes: usize,
    last: Option<StoreSnapshot>,
}

impl MemorySnapshotSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of snapshots persisted so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    /// The most recently persisted snapshot, if any.
    #[must_use]
    pub fn last(&self) -> Option<StoreSnapshot> {
        self.state().last.clone()
    }
}

impl SnapshotSink for MemorySnapshotSink {
    fn persist(&mut self, snapshot: &StoreSnapshot) -> Result<()> {
        let mut state = self.state();
        state.writes += 1;
        state.last = Some(snapshot.clone());
        Ok(())
    }
}

/// Per-user aggregate counts for STATUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStatus {
    pub inbox_total: usize,
    pub unread: usize,
    pub sent_total: usize,
}

/// Global aggregate counts for STATUS without a username. The live
/// session count is owned by the server, not the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStatus {
    pub users: usize,
    pub emails: usize,
}

/// Users and messages, plus the monotonically increasing id counter.
///
/// Messages keep insertion order; `users` is a sorted map so
/// snapshots serialize deterministically.
pub struct MailStore {
    users: BTreeMap<String, String>,
    emails: Vec<Message>,
    email_id_counter: u64,
    sink: Box<dyn SnapshotSink>,
}

impl MailStore {
    /// Create a store from a snapshot and a durability sink.
    #[must_use]
    pub fn new(snapshot: StoreSnapshot, sink: Box<dyn SnapshotSink>) -> Self {
        Self {
            users: snapshot.users,
            emails: snapshot.emails,
            email_id_counter: snapshot.email_id_counter,
            sink,
        }
    }

    /// Open (or create) the JSON-backed store at `path`.
    #[must_use]
    pub fn open(path: &Path) -> Self {
        let file = JsonSnapshotFile::new(path);
        let snapshot = file.load();
        Self::new(snapshot, Box::new(file))
    }

    /// A store with an in-memory sink, for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(StoreSnapshot::default(), Box::new(MemorySnapshotSink::new()))
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            users: self.users.clone(),
            emails: self.emails.clone(),
            email_id_counter: self.email_id_counter,
        }
    }

    fn persist(&mut self) -> std::result::Result<(), StoreError> {
        let snapshot = self.snapshot();
        self.sink
            .persist(&snapshot)
            .map_err(|e| StoreError::Persist(e.to_string()))
    }

    /// Register a new user. Usernames are unique; users are never
    /// deleted or mutated afterwards.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` if the username is taken; `Persist` if the
    /// snapshot write fails.
    pub fn register(&mut self, username: &str, password: &str) -> std::result::Result<(), StoreError> {
        if self.users.contains_key(username) {
            return Err(StoreError::AlreadyExists);
        }
        self.users
            .insert(username.to_string(), password.to_string());
        self.persist()?;
        info!(user = username, "New user registered");
        Ok(())
    }

    /// Verify credentials by verbatim comparison.
    ///
    /// # Errors
    ///
    /// `UserNotFound` for an unknown username -- never reported as a
    /// password failure -- and `WrongPassword` on mismatch.
    pub fn authenticate(&self, username: &str, password: &str) -> std::result::Result<(), StoreError> {
        match self.users.get(username) {
            None => Err(StoreError::UserNotFound),
            Some(stored) if stored != password => Err(StoreError::WrongPassword),
            Some(_) => Ok(()),
        }
    }

    /// Store a new message, assigning the next id.
    ///
    /// # Errors
    ///
    /// `RecipientNotFound` if `to` is not registered; `Persist` on a
    /// failed snapshot write.
    pub fn deliver(
        &mut self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<MessageId, StoreError> {
        if !self.users.contains_key(to) {
            return Err(StoreError::RecipientNotFound);
        }

        self.email_id_counter += 1;
        let id = self.email_id_counter;
        self.emails.push(Message {
            id,
            from: from.to_string(),
            to: to.to_string(),
            subject: sanitize_subject(subject),
            body: body.to_string(),
            timestamp: timestamp_now(),
            read: false,
        });
        self.persist()?;
        info!(id, from, to, "Email delivered");
        Ok(id)
    }

    /// Inbox summaries for a user, in insertion order.
    #[must_use]
    pub fn list_inbox(&self, username: &str) -> Vec<InboxEntry> {
        self.emails
            .iter()
            .filter(|m| m.to == username)
            .map(|m| InboxEntry {
                id: m.id,
                from: m.from.clone(),
                subject: m.subject.clone(),
                timestamp: m.timestamp.clone(),
                read: m.read,
            })
            .collect()
    }

    /// Sent summaries for a user, in insertion order.
    #[must_use]
    pub fn list_sent(&self, username: &str) -> Vec<SentEntry> {
        self.emails
            .iter()
            .filter(|m| m.from == username)
            .map(|m| SentEntry {
                id: m.id,
                to: m.to.clone(),
                subject: m.subject.clone(),
                timestamp: m.timestamp.clone(),
            })
            .collect()
    }

    fn find(&self, id: MessageId) -> std::result::Result<usize, StoreError> {
        self.emails
            .iter()
            .position(|m| m.id == id)
            .ok_or(StoreError::MessageNotFound)
    }

    fn check_access(message: &Message, username: &str) -> std::result::Result<(), StoreError> {
        if message.to == username || message.from == username {
            Ok(())
        } else {
            Err(StoreError::AccessDenied)
        }
    }

    /// Fetch a full message. Readable by sender or recipient; only a
    /// recipient read flips the read flag (and that flip persists).
    ///
    /// # Errors
    ///
    /// `MessageNotFound`, `AccessDenied`, or `Persist`.
    pub fn read(&mut self, username: &str, id: MessageId) -> std::result::Result<Message, StoreError> {
        let idx = self.find(id)?;
        Self::check_access(&self.emails[idx], username)?;

        if self.emails[idx].to == username && !self.emails[idx].read {
            self.emails[idx].read = true;
            self.persist()?;
        }
        Ok(self.emails[idx].clone())
    }

    /// Physically remove a message. Same access rule as [`read`];
    /// the id is never reused.
    ///
    /// # Errors
    ///
    /// `MessageNotFound`, `AccessDenied`, or `Persist`.
    ///
    /// [`read`]: MailStore::read
    pub fn delete(&mut self, username: &str, id: MessageId) -> std::result::Result<(), StoreError> {
        let idx = self.find(id)?;
        Self::check_access(&self.emails[idx], username)?;

        self.emails.remove(idx);
        self.persist()?;
        info!(id, user = username, "Email deleted");
        Ok(())
    }

    /// Create a forwarded copy addressed to `new_to`, authored by the
    /// forwarder. The original is neither mutated nor referenced.
    ///
    /// # Errors
    ///
    /// `MessageNotFound`, `AccessDenied`, `RecipientNotFound`, or
    /// `Persist`.
    pub fn forward(
        &mut self,
        username: &str,
        id: MessageId,
        new_to: &str,
    ) -> std::result::Result<MessageId, StoreError> {
        let idx = self.find(id)?;
        Self::check_access(&self.emails[idx], username)?;

        if !self.users.contains_key(new_to) {
            return Err(StoreError::RecipientNotFound);
        }

        let original = self.emails[idx].clone();
        self.email_id_counter += 1;
        let new_id = self.email_id_counter;
        self.emails.push(Message {
            id: new_id,
            from: username.to_string(),
            to: new_to.to_string(),
            subject: format!("FWD: {}", original.subject),
            body: format!("[Forwarded from {}]\n\n{}", original.from, original.body),
            timestamp: timestamp_now(),
            read: false,
        });
        self.persist()?;
        info!(id, new_id, user = username, to = new_to, "Email forwarded");
        Ok(new_id)
    }

    /// Render a message for export. Read-only; same access rule as
    /// [`read`](MailStore::read). Returns the suggested filename and
    /// the rendered text.
    ///
    /// # Errors
    ///
    /// `MessageNotFound` or `AccessDenied`.
    pub fn export(
        &self,
        username: &str,
        id: MessageId,
    ) -> std::result::Result<(String, String), StoreError> {
        let idx = self.find(id)?;
        let message = &self.emails[idx];
        Self::check_access(message, username)?;

        let filename = format!("email_{id}_{username}.txt");
        let content = format!(
            "From: {}\nTo: {}\nSubject: {}\nDate: {}\n\n{}\n",
            message.from, message.to, message.subject, message.timestamp, message.body
        );
        Ok((filename, content))
    }

    /// Per-user aggregate counts.
    #[must_use]
    pub fn user_status(&self, username: &str) -> UserStatus {
        let inbox_total = self.emails.iter().filter(|m| m.to == username).count();
        let unread = self
            .emails
            .iter()
            .filter(|m| m.to == username && !m.read)
            .count();
        let sent_total = self.emails.iter().filter(|m| m.from == username).count();
        UserStatus {
            inbox_total,
            unread,
            sent_total,
        }
    }

    /// Global aggregate counts.
    #[must_use]
    pub fn global_status(&self) -> GlobalStatus {
        GlobalStatus {
            users: self.users.len(),
            emails: self.emails.len(),
        }
    }
}
