//! High-level mail client
//!
//! [`MailClient`] wraps a [`MailSession`] with the logged-in user's
//! state: the local inbox/sent cache, the draft file, and the data
//! directory for exports. Mutating operations re-sync the affected
//! listing afterwards; a sync that cannot reach the server keeps the
//! previous cached entries and reports them as stale rather than
//! failing the whole operation.

use crate::cache::{CacheFile, CacheState, Draft, DraftFile, SyncOutcome};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    Command, InboxEntry, MessageView, SentEntry, parse_inbox_listing, parse_sent_listing,
    sanitize_subject, timestamp_now,
};
use crate::session::MailSession;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// State of the authenticated user.
struct ActiveUser {
    username: String,
    cache: CacheState,
    cache_file: CacheFile,
    drafts: DraftFile,
}

/// A stateful mail client bound to one server and, after login, one
/// user.
pub struct MailClient {
    session: MailSession,
    data_dir: PathBuf,
    user: Option<ActiveUser>,
}

impl MailClient {
    #[must_use]
    pub fn new(session: MailSession, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            data_dir: data_dir.into(),
            user: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            MailSession::new(config.host.clone(), config.port),
            config.data_dir.clone(),
        )
    }

    /// The logged-in username, if any.
    #[must_use]
    pub fn current_user(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }

    fn username(&self) -> Result<String> {
        self.user
            .as_ref()
            .map(|u| u.username.clone())
            .ok_or(Error::NotLoggedIn)
    }

    fn user_mut(&mut self) -> Result<&mut ActiveUser> {
        self.user.as_mut().ok_or(Error::NotLoggedIn)
    }

    /// Register a new account. Does not log in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] if the username is taken or the
    /// server is unreachable.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .session
            .send_command(&Command::Register {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await
            .into_ok()?;
        Ok(resp.rest)
    }

    /// Authenticate, load the user's local cache, and sync both
    /// listings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] on bad credentials or an unreachable
    /// server, or an IO error if the refreshed cache cannot be saved.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .session
            .send_command(&Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await
            .into_ok()?;

        let cache_file = CacheFile::new(&self.data_dir, username);
        let cache = cache_file.load();
        info!(
            username,
            cached_inbox = cache.inbox.len(),
            cached_sent = cache.sent.len(),
            "Logged in"
        );

        self.user = Some(ActiveUser {
            username: username.to_string(),
            cache,
            cache_file,
            drafts: DraftFile::new(&self.data_dir, username),
        });

        // Best effort: a failed sync leaves the loaded cache in place.
        self.sync_inbox().await?;
        self.sync_sent().await?;
        Ok(resp.rest)
    }

    /// Save the cache, forget the user, and drop the connection.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the cache file cannot be written.
    pub fn logout(&mut self) -> Result<()> {
        if let Some(user) = self.user.take() {
            user.cache_file.save(&user.cache)?;
            info!(username = %user.username, "Logged out");
        }
        self.session.disconnect();
        Ok(())
    }

    /// Cached inbox entries (empty when logged out).
    #[must_use]
    pub fn inbox(&self) -> &[InboxEntry] {
        self.user.as_ref().map_or(&[], |u| &u.cache.inbox)
    }

    /// Cached sent entries (empty when logged out).
    #[must_use]
    pub fn sent(&self) -> &[SentEntry] {
        self.user.as_ref().map_or(&[], |u| &u.cache.sent)
    }

    /// When the inbox was last freshly synced, if ever.
    #[must_use]
    pub fn last_sync(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|u| u.cache.last_sync.as_deref())
    }

    /// Refresh the inbox cache from the server.
    ///
    /// A fresh listing replaces the cache wholesale and stamps
    /// `last_sync`; a failed request keeps the previous entries and
    /// returns them as [`SyncOutcome::Stale`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`], or an IO error if the
    /// refreshed cache cannot be saved.
    pub async fn sync_inbox(&mut self) -> Result<SyncOutcome<InboxEntry>> {
        let username = self.username()?;
        let resp = self.session.send_command(&Command::Inbox { username }).await;

        let user = self.user_mut()?;
        if resp.is_ok() || resp.is_empty() {
            let entries = if resp.is_ok() {
                // Payload is `count|listing`; the count is advisory.
                let listing = resp.rest.split_once('|').map_or("", |(_, l)| l);
                parse_inbox_listing(listing)
            } else {
                Vec::new()
            };
            user.cache.inbox.clone_from(&entries);
            user.cache.last_sync = Some(timestamp_now());
            user.cache_file.save(&user.cache)?;
            Ok(SyncOutcome::Fresh(entries))
        } else {
            debug!(reason = %resp.rest, "Inbox sync failed, serving cached entries");
            Ok(SyncOutcome::Stale(user.cache.inbox.clone(), resp.rest))
        }
    }

    /// Refresh the sent cache from the server. Same fallback rules as
    /// [`Self::sync_inbox`], but `last_sync` is not touched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`], or an IO error if the
    /// refreshed cache cannot be saved.
    pub async fn sync_sent(&mut self) -> Result<SyncOutcome<SentEntry>> {
        let username = self.username()?;
        let resp = self.session.send_command(&Command::Sent { username }).await;

        let user = self.user_mut()?;
        if resp.is_ok() || resp.is_empty() {
            let entries = if resp.is_ok() {
                let listing = resp.rest.split_once('|').map_or("", |(_, l)| l);
                parse_sent_listing(listing)
            } else {
                Vec::new()
            };
            user.cache.sent.clone_from(&entries);
            user.cache_file.save(&user.cache)?;
            Ok(SyncOutcome::Fresh(entries))
        } else {
            debug!(reason = %resp.rest, "Sent sync failed, serving cached entries");
            Ok(SyncOutcome::Stale(user.cache.sent.clone(), resp.rest))
        }
    }

    /// Send a message. The subject is sanitized at capture time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or [`Error::Server`].
    pub async fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<String> {
        let from = self.username()?;
        let resp = self
            .session
            .send_command(&Command::Send {
                from,
                to: to.to_string(),
                subject: sanitize_subject(subject),
                body: body.to_string(),
            })
            .await
            .into_ok()?;

        self.sync_sent().await?;
        Ok(resp.rest)
    }

    /// Fetch a full message. If it is addressed to the logged-in user
    /// the cached inbox entry is marked read to match the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or [`Error::Server`].
    pub async fn read(&mut self, id: u64) -> Result<MessageView> {
        let username = self.username()?;
        let resp = self
            .session
            .send_command(&Command::Read {
                username: username.clone(),
                id,
            })
            .await
            .into_ok()?;
        let view = MessageView::parse(&resp.rest)?;

        if view.to == username {
            let user = self.user_mut()?;
            if let Some(entry) = user.cache.inbox.iter_mut().find(|e| e.id == id)
                && !entry.read
            {
                entry.read = true;
                user.cache_file.save(&user.cache)?;
            }
        }
        Ok(view)
    }

    /// Delete a message, then refresh the inbox cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or [`Error::Server`].
    pub async fn delete(&mut self, id: u64) -> Result<String> {
        let username = self.username()?;
        let resp = self
            .session
            .send_command(&Command::Delete { username, id })
            .await
            .into_ok()?;

        self.sync_inbox().await?;
        Ok(resp.rest)
    }

    /// Forward a message, then refresh the sent cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or [`Error::Server`].
    pub async fn forward(&mut self, id: u64, to: &str) -> Result<String> {
        let username = self.username()?;
        let resp = self
            .session
            .send_command(&Command::Forward {
                username,
                id,
                to: to.to_string(),
            })
            .await
            .into_ok()?;

        self.sync_sent().await?;
        Ok(resp.rest)
    }

    /// Reply to a message: the answer goes to the original sender
    /// with an `RE:` subject and the original body quoted below.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or [`Error::Server`].
    pub async fn reply(&mut self, id: u64, body: &str) -> Result<String> {
        let original = self.read(id).await?;
        let subject = format!("RE: {}", original.subject);
        let quoted = format!("{body}\n\n--- Original Message ---\n{}", original.body);
        self.send(&original.from, &subject, &quoted).await
    }

    /// Export a message to a text file in the data directory and
    /// return its path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`], [`Error::Server`], or an IO
    /// error if the file cannot be written.
    pub async fn export(&mut self, id: u64) -> Result<PathBuf> {
        let username = self.username()?;
        let resp = self
            .session
            .send_command(&Command::Export { username, id })
            .await
            .into_ok()?;

        let (filename, content) = resp
            .rest
            .split_once('|')
            .ok_or_else(|| Error::Protocol(format!("Malformed EXPORT response: {}", resp.rest)))?;

        fs::create_dir_all(&self.data_dir)?;
        let path = self.data_dir.join(filename);
        fs::write(&path, content)?;
        info!(path = %path.display(), "Exported message");
        Ok(path)
    }

    /// The logged-in user's mailbox counters, as reported by the
    /// server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or [`Error::Server`].
    pub async fn status(&mut self) -> Result<String> {
        let username = self.username()?;
        let resp = self
            .session
            .send_command(&Command::Status {
                username: Some(username),
            })
            .await
            .into_ok()?;
        Ok(resp.rest)
    }

    /// Server-wide counters. Available without login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Server`] if the server is unreachable.
    pub async fn global_status(&mut self) -> Result<String> {
        let resp = self
            .session
            .send_command(&Command::Status { username: None })
            .await
            .into_ok()?;
        Ok(resp.rest)
    }

    /// Save a draft locally. The subject is sanitized the same way a
    /// sent subject would be.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or an IO error.
    pub fn save_draft(&mut self, to: &str, subject: &str, body: &str) -> Result<Draft> {
        let subject = sanitize_subject(subject);
        self.user_mut()?.drafts.save_new(to, &subject, body)
    }

    /// All saved drafts for the logged-in user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`].
    pub fn drafts(&self) -> Result<Vec<Draft>> {
        self.user
            .as_ref()
            .map(|u| u.drafts.load())
            .ok_or(Error::NotLoggedIn)
    }

    /// Delete a draft by id. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`] or an IO error.
    pub fn delete_draft(&mut self, id: u64) -> Result<bool> {
        self.user_mut()?.drafts.remove(id)
    }

    /// Send a saved draft. The draft is removed only after the server
    /// confirms delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLoggedIn`], a protocol error for an
    /// unknown draft id, or [`Error::Server`] if delivery fails.
    pub async fn send_draft(&mut self, id: u64) -> Result<String> {
        let draft = self
            .user_mut()?
            .drafts
            .get(id)
            .ok_or_else(|| Error::Protocol(format!("Draft #{id} not found")))?;

        let message = self.send(&draft.to, &draft.subject, &draft.body).await?;
        self.user_mut()?.drafts.remove(id)?;
        Ok(message)
    }

    /// Export directory for files written by [`Self::export`].
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
