//! Local cache and draft storage
//!
//! The client mirrors its inbox and sent listings in memory and on
//! disk, one JSON file per user. Sync is full-replace: a fresh
//! listing overwrites the cached one wholesale, an error leaves the
//! previous snapshot in place as a stale fallback. Cache entries
//! never outlive the username they were loaded for -- each user has
//! their own file and switching users reloads from scratch.
//!
//! Drafts live in a separate per-user file and carry stable generated
//! ids, so deleting a draft after sending it is unambiguous even if
//! the file was edited in between.

use crate::error::Result;
use crate::protocol::{InboxEntry, SentEntry, timestamp_now};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The in-memory mirror of one user's server-side state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    pub inbox: Vec<InboxEntry>,
    pub sent: Vec<SentEntry>,
    pub last_sync: Option<String>,
}

/// Outcome of a sync attempt: fresh server truth, or the previous
/// cached entries kept as a stale fallback with the failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome<T> {
    Fresh(Vec<T>),
    Stale(Vec<T>, String),
}

impl<T> SyncOutcome<T> {
    #[must_use]
    pub fn entries(&self) -> &[T] {
        match self {
            Self::Fresh(entries) | Self::Stale(entries, _) => entries,
        }
    }

    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<T> {
        match self {
            Self::Fresh(entries) | Self::Stale(entries, _) => entries,
        }
    }
}

/// On-disk cache document; records which user it belongs to.
#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    username: String,
    cache: CacheState,
    saved_at: String,
}

/// Whole-file JSON persistence for one user's [`CacheState`]
/// (`<data_dir>/<username>_data.json`).
#[derive(Debug, Clone)]
pub struct CacheFile {
    username: String,
    path: PathBuf,
}

impl CacheFile {
    #[must_use]
    pub fn new(data_dir: &Path, username: &str) -> Self {
        Self {
            username: username.to_string(),
            path: data_dir.join(format!("{username}_data.json")),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached state. Missing, corrupted, or foreign-user
    /// files all yield a fresh empty cache.
    #[must_use]
    pub fn load(&self) -> CacheState {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return CacheState::default();
        };
        match serde_json::from_str::<CacheDocument>(&raw) {
            Ok(doc) if doc.username == self.username => {
                debug!(path = %self.path.display(), "Loaded cached data");
                doc.cache
            }
            Ok(doc) => {
                warn!(
                    expected = %self.username,
                    found = %doc.username,
                    "Cache file belongs to another user, ignoring"
                );
                CacheState::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache file corrupted, ignoring");
                CacheState::default()
            }
        }
    }

    /// Rewrite the whole cache file.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created or
    /// the file cannot be written.
    pub fn save(&self, cache: &CacheState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = CacheDocument {
            username: self.username.clone(),
            cache: cache.clone(),
            saved_at: timestamp_now(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }
}

/// A saved draft. Ids are generated, stable, and never reused within
/// a draft file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub id: u64,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub timestamp: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DraftDocument {
    next_id: u64,
    drafts: Vec<Draft>,
}

/// Whole-file JSON persistence for one user's drafts
/// (`<data_dir>/<username>_drafts.json`).
#[derive(Debug, Clone)]
pub struct DraftFile {
    path: PathBuf,
}

impl DraftFile {
    #[must_use]
    pub fn new(data_dir: &Path, username: &str) -> Self {
        Self {
            path: data_dir.join(format!("{username}_drafts.json")),
        }
    }

    fn load_document(&self) -> DraftDocument {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return DraftDocument::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Draft file corrupted, ignoring");
            DraftDocument::default()
        })
    }

    fn save_document(&self, doc: &DraftDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(doc)?)?;
        Ok(())
    }

    /// All saved drafts, oldest first.
    #[must_use]
    pub fn load(&self) -> Vec<Draft> {
        self.load_document().drafts
    }

    /// Look up one draft by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Draft> {
        self.load().into_iter().find(|d| d.id == id)
    }

    /// Append a new draft with a fresh id and the current timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the draft file cannot be written.
    pub fn save_new(&self, to: &str, subject: &str, body: &str) -> Result<Draft> {
        let mut doc = self.load_document();
        doc.next_id += 1;
        let draft = Draft {
            id: doc.next_id,
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: timestamp_now(),
        };
        doc.drafts.push(draft.clone());
        self.save_document(&doc)?;
        Ok(draft)
    }

    /// Remove the draft with the given id. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the draft file cannot be rewritten.
    pub fn remove(&self, id: u64) -> Result<bool> {
        let mut doc = self.load_document();
        let before = doc.drafts.len();
        doc.drafts.retain(|d| d.id != id);
        if doc.drafts.len() == before {
            return Ok(false);
        }
        self.save_document(&doc)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, from: &str) -> InboxEntry {
        InboxEntry {
            id,
            from: from.to_string(),
            subject: "Hi".to_string(),
            timestamp: "2024-01-01 10:00:00".to_string(),
            read: false,
        }
    }

    #[test]
    fn cache_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = CacheFile::new(dir.path(), "alice");

        let state = CacheState {
            inbox: vec![entry(1, "bob")],
            sent: vec![],
            last_sync: Some("2024-01-01 12:00:00".to_string()),
        };
        file.save(&state).unwrap();

        assert_eq!(file.load(), state);
    }

    #[test]
    fn missing_cache_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = CacheFile::new(dir.path(), "alice");
        assert_eq!(file.load(), CacheState::default());
    }

    #[test]
    fn corrupted_cache_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = CacheFile::new(dir.path(), "alice");
        fs::write(file.path(), "{broken").unwrap();
        assert_eq!(file.load(), CacheState::default());
    }

    #[test]
    fn cache_never_crosses_usernames() {
        let dir = tempfile::tempdir().unwrap();

        let alice = CacheFile::new(dir.path(), "alice");
        alice
            .save(&CacheState {
                inbox: vec![entry(1, "bob")],
                ..CacheState::default()
            })
            .unwrap();

        // Bob's file does not exist; loading bob must not see alice's
        // entries.
        let bob = CacheFile::new(dir.path(), "bob");
        assert_eq!(bob.load(), CacheState::default());

        // Even a file renamed onto bob's path is rejected by the
        // username recorded inside it.
        fs::copy(alice.path(), bob.path()).unwrap();
        assert_eq!(bob.load(), CacheState::default());
    }

    #[test]
    fn sync_outcome_accessors() {
        let fresh = SyncOutcome::Fresh(vec![entry(1, "bob")]);
        assert!(fresh.is_fresh());
        assert_eq!(fresh.entries().len(), 1);

        let stale = SyncOutcome::Stale(vec![entry(1, "bob")], "Server timeout".to_string());
        assert!(!stale.is_fresh());
        assert_eq!(stale.into_entries().len(), 1);
    }

    #[test]
    fn draft_ids_are_stable_and_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = DraftFile::new(dir.path(), "alice");

        let d1 = drafts.save_new("bob", "One", "body 1").unwrap();
        let d2 = drafts.save_new("bob", "Two", "body 2").unwrap();
        let d3 = drafts.save_new("bob", "Three", "body 3").unwrap();
        assert!(d1.id < d2.id && d2.id < d3.id);

        // Deleting the middle draft leaves the others' ids untouched.
        assert!(drafts.remove(d2.id).unwrap());
        let remaining = drafts.load();
        assert_eq!(
            remaining.iter().map(|d| d.id).collect::<Vec<_>>(),
            vec![d1.id, d3.id]
        );

        // A new draft gets a brand-new id, not the freed one.
        let d4 = drafts.save_new("bob", "Four", "body 4").unwrap();
        assert!(d4.id > d3.id);
    }

    #[test]
    fn removing_unknown_draft_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = DraftFile::new(dir.path(), "alice");
        drafts.save_new("bob", "One", "body").unwrap();

        assert!(!drafts.remove(999).unwrap());
        assert_eq!(drafts.load().len(), 1);
    }

    #[test]
    fn get_finds_draft_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let drafts = DraftFile::new(dir.path(), "alice");
        let saved = drafts.save_new("bob", "One", "body").unwrap();

        assert_eq!(drafts.get(saved.id), Some(saved));
        assert_eq!(drafts.get(999), None);
    }
}
