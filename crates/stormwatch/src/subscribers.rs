//! Persisted subscriber list.
//!
//! The snapshot file is the single source of truth shared by every process
//! that touches it (the scheduled `run`/`watch` pass and the interactive
//! `bot`). There is no locking. Every write goes through
//! [`SubscriberStore::commit`], which re-reads the file, merges the caller's
//! changes into what it finds, and atomically replaces the file with the
//! result. A stale in-memory copy is never written back.
//!
//! File format:
//!
//! ```json
//! {
//!   "subscribers": ["123456789", "-100200300"],
//!   "first_seen": { "123456789": "2024-03-04T07:00:00Z" }
//! }
//! ```
//!
//! `first_seen` is optional on read; files holding only `subscribers`
//! (integers or strings) load fine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors from subscriber persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The snapshot exists but cannot be parsed.
    #[error("subscriber file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode subscriber file: {0}")]
    Encode(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, StoreError>;

/// A chat identifier. Compared exactly, with no normalization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawChatId", into = "String")]
pub struct ChatId(String);

/// Chat ids show up as integers in hand-written files and as strings elsewhere.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawChatId {
    Int(i64),
    Str(String),
}

impl From<RawChatId> for ChatId {
    fn from(raw: RawChatId) -> Self {
        match raw {
            RawChatId::Int(n) => Self(n.to_string()),
            RawChatId::Str(s) => Self(s),
        }
    }
}

impl From<ChatId> for String {
    fn from(id: ChatId) -> Self {
        id.0
    }
}

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscriber as observed by some process.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub chat_id: ChatId,
    pub first_seen: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(chat_id: impl Into<ChatId>, first_seen: DateTime<Utc>) -> Self {
        Self {
            chat_id: chat_id.into(),
            first_seen,
        }
    }
}

/// Complete authoritative state of the subscriber file at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub subscribers: Vec<ChatId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub first_seen: BTreeMap<String, DateTime<Utc>>,
}

impl Snapshot {
    pub fn from_ids(ids: impl IntoIterator<Item = ChatId>) -> Self {
        let mut snapshot = Self::default();
        for id in ids {
            if !snapshot.contains(&id) {
                snapshot.subscribers.push(id);
            }
        }
        snapshot
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.subscribers.contains(chat_id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn first_seen(&self, chat_id: &ChatId) -> Option<DateTime<Utc>> {
        self.first_seen.get(chat_id.as_str()).copied()
    }

    /// Drop duplicate ids (first occurrence wins) and orphaned timestamps.
    fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.subscribers.retain(|id| seen.insert(id.clone()));
        self.first_seen.retain(|id, _| seen.contains(&ChatId::new(id.as_str())));
    }

    /// Set difference, applied in place.
    fn remove_all(&mut self, ids: &[ChatId]) {
        self.subscribers.retain(|id| !ids.contains(id));
        for id in ids {
            self.first_seen.remove(id.as_str());
        }
    }
}

/// Merge locally observed additions into a freshly read snapshot.
///
/// The result keeps `remote`'s order and appends additions that are not
/// already present, in observation order. It never contains duplicates, and
/// never loses an id that `remote` holds.
pub fn reconcile(remote: &Snapshot, local_additions: &[Subscriber]) -> Snapshot {
    let mut merged = remote.clone();
    merged.dedup();
    for sub in local_additions {
        if merged.contains(&sub.chat_id) {
            continue;
        }
        merged.subscribers.push(sub.chat_id.clone());
        merged
            .first_seen
            .entry(sub.chat_id.as_str().to_string())
            .or_insert(sub.first_seen);
    }
    merged
}

/// Subscriber changes accumulated by one process before they are committed.
///
/// The latest intent for a chat wins: adding a chat cancels an earlier
/// removal of the same chat within the same batch, and vice versa.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub added: Vec<Subscriber>,
    pub removed: Vec<ChatId>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscriber: Subscriber) {
        self.removed.retain(|id| *id != subscriber.chat_id);
        if !self.added.iter().any(|s| s.chat_id == subscriber.chat_id) {
            self.added.push(subscriber);
        }
    }

    pub fn remove(&mut self, chat_id: ChatId) {
        self.added.retain(|s| s.chat_id != chat_id);
        if !self.removed.contains(&chat_id) {
            self.removed.push(chat_id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// What a commit actually changed, relative to the fresh snapshot it read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Ids that were not in the file before this commit.
    pub added: Vec<ChatId>,
    /// Ids that were in the file and are now gone.
    pub removed: Vec<ChatId>,
    /// The snapshot now on disk.
    pub snapshot: Snapshot,
}

impl CommitReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// File-backed subscriber store.
#[derive(Debug, Clone)]
pub struct SubscriberStore {
    path: PathBuf,
}

impl SubscriberStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot file as it is right now.
    ///
    /// A missing file is an empty snapshot. Unparseable content is
    /// [`StoreError::Corrupt`].
    pub fn read_snapshot(&self) -> Result<Snapshot> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(Snapshot::default());
        }
        let mut snapshot: Snapshot =
            serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        snapshot.dedup();
        Ok(snapshot)
    }

    /// Current snapshot, or an empty one if the file cannot be read.
    pub fn snapshot(&self) -> Snapshot {
        match self.read_snapshot() {
            Ok(s) => s,
            Err(e) => {
                log::warn!(
                    "[Subscribers] {}; continuing with NO persisted subscribers for now",
                    e
                );
                Snapshot::default()
            }
        }
    }

    /// Current subscriber ids, in file order.
    pub fn load(&self) -> Vec<ChatId> {
        self.snapshot().subscribers
    }

    /// Add one chat. Returns true if it was not already subscribed.
    pub fn add(&self, chat_id: impl Into<ChatId>) -> Result<bool> {
        let mut changes = Changes::new();
        changes.add(Subscriber::new(chat_id, Utc::now()));
        Ok(self.commit(&changes)?.changed())
    }

    /// Remove one chat. Returns true if it was subscribed.
    pub fn remove(&self, chat_id: impl Into<ChatId>) -> Result<bool> {
        let mut changes = Changes::new();
        changes.remove(chat_id.into());
        Ok(self.commit(&changes)?.changed())
    }

    /// Apply `changes` to the latest snapshot on disk.
    ///
    /// Read-latest, merge, write-union: additions are reconciled into the
    /// freshly read file and removals are a set difference on that same fresh
    /// copy. A corrupt file is moved aside before being replaced. Nothing is
    /// written when the result equals what is already on disk.
    pub fn commit(&self, changes: &Changes) -> Result<CommitReport> {
        let mut quarantined = false;
        let fresh = match self.read_snapshot() {
            Ok(s) => s,
            Err(StoreError::Corrupt { reason, .. }) => {
                let aside = self.quarantine()?;
                log::warn!(
                    "[Subscribers] {} was corrupt ({}); moved to {} and starting a new list",
                    self.path.display(),
                    reason,
                    aside.display()
                );
                quarantined = true;
                Snapshot::default()
            }
            Err(e) => return Err(e),
        };

        let mut merged = reconcile(&fresh, &changes.added);
        merged.remove_all(&changes.removed);

        let added: Vec<ChatId> = merged
            .subscribers
            .iter()
            .filter(|id| !fresh.contains(id))
            .cloned()
            .collect();
        let removed: Vec<ChatId> = fresh
            .subscribers
            .iter()
            .filter(|id| !merged.contains(id))
            .cloned()
            .collect();

        if quarantined || merged != fresh {
            self.write_atomic(&merged)?;
            for id in &added {
                log::info!("[Subscribers] added {}", id);
            }
            for id in &removed {
                log::info!("[Subscribers] removed {}", id);
            }
        }

        Ok(CommitReport {
            added,
            removed,
            snapshot: merged,
        })
    }

    /// Write to a temp file in the same directory, then rename over the target.
    fn write_atomic(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, snapshot)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Move a corrupt file to `<file>.corrupt-<timestamp>` so it is never lost.
    fn quarantine(&self) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{}", stamp));
        let aside = PathBuf::from(aside);
        std::fs::rename(&self.path, &aside).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(aside)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ids(list: &[&str]) -> Vec<ChatId> {
        list.iter().map(|s| ChatId::from(*s)).collect()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn store() -> (tempfile::TempDir, SubscriberStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriberStore::new(dir.path().join("subscribers.json"));
        (dir, store)
    }

    #[test]
    fn reconcile_keeps_remote_and_appends_additions() {
        let remote = Snapshot::from_ids(ids(&["A", "C"]));
        let merged = reconcile(&remote, &[Subscriber::new("B", at(7))]);
        assert_eq!(merged.subscribers, ids(&["A", "C", "B"]));
        assert_eq!(merged.first_seen(&ChatId::from("B")), Some(at(7)));
    }

    #[test]
    fn reconcile_never_duplicates() {
        let remote = Snapshot::from_ids(ids(&["A", "B"]));
        let merged = reconcile(
            &remote,
            &[
                Subscriber::new("B", at(7)),
                Subscriber::new("D", at(8)),
                Subscriber::new("D", at(9)),
            ],
        );
        assert_eq!(merged.subscribers, ids(&["A", "B", "D"]));
        assert_eq!(merged.first_seen(&ChatId::from("D")), Some(at(8)));
    }

    #[test]
    fn chat_ids_compare_exactly() {
        assert_ne!(ChatId::from("0123"), ChatId::from("123"));
        assert_eq!(ChatId::from(-100200300), ChatId::from("-100200300"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let (_dir, store) = store();
        assert!(store.load().is_empty());
        assert_eq!(store.read_snapshot().unwrap(), Snapshot::default());
    }

    #[test]
    fn add_is_idempotent() {
        let (_dir, store) = store();
        assert!(store.add("123").unwrap());
        assert!(!store.add("123").unwrap());
        assert_eq!(store.load(), ids(&["123"]));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.matches("\"123\"").count(), 2); // list + first_seen key
    }

    #[test]
    fn remove_reports_presence() {
        let (_dir, store) = store();
        store.add("123").unwrap();
        assert!(store.remove("123").unwrap());
        assert!(!store.remove("123").unwrap());
        assert!(store.load().is_empty());
    }

    #[test]
    fn accepts_integer_ids_without_first_seen() {
        let (_dir, store) = store();
        std::fs::write(store.path(), r#"{"subscribers": [123, "456", 123]}"#).unwrap();
        assert_eq!(store.load(), ids(&["123", "456"]));
    }

    #[test]
    fn commit_merges_with_concurrent_writer() {
        let (_dir, store) = store();
        std::fs::write(store.path(), r#"{"subscribers": ["A"]}"#).unwrap();

        // This process observes B; meanwhile another process adds C.
        let mut changes = Changes::new();
        changes.add(Subscriber::new("B", at(7)));
        std::fs::write(store.path(), r#"{"subscribers": ["A", "C"]}"#).unwrap();

        let report = store.commit(&changes).unwrap();
        assert_eq!(report.added, ids(&["B"]));
        assert_eq!(store.load(), ids(&["A", "C", "B"]));
    }

    #[test]
    fn removal_applies_to_fresh_snapshot() {
        let (_dir, store) = store();
        std::fs::write(store.path(), r#"{"subscribers": ["A", "B"]}"#).unwrap();

        let mut changes = Changes::new();
        changes.remove(ChatId::from("A"));
        // Another process adds D before we commit.
        std::fs::write(store.path(), r#"{"subscribers": ["A", "B", "D"]}"#).unwrap();

        let report = store.commit(&changes).unwrap();
        assert_eq!(report.removed, ids(&["A"]));
        assert_eq!(store.load(), ids(&["B", "D"]));
    }

    #[test]
    fn latest_intent_wins_within_a_batch() {
        let mut changes = Changes::new();
        changes.add(Subscriber::new("A", at(7)));
        changes.remove(ChatId::from("A"));
        assert!(changes.added.is_empty());
        assert_eq!(changes.removed, ids(&["A"]));

        changes.add(Subscriber::new("A", at(8)));
        assert!(changes.removed.is_empty());
        assert_eq!(changes.added.len(), 1);
    }

    #[test]
    fn corrupt_file_loads_empty_and_is_preserved_on_commit() {
        let (dir, store) = store();
        std::fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.read_snapshot(), Err(StoreError::Corrupt { .. })));
        assert!(store.load().is_empty());

        assert!(store.add("42").unwrap());
        assert_eq!(store.load(), ids(&["42"]));

        let preserved: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(preserved.len(), 1);
        assert_eq!(
            std::fs::read_to_string(preserved[0].path()).unwrap(),
            "{ not json"
        );
    }

    #[test]
    fn empty_commit_does_not_create_file() {
        let (_dir, store) = store();
        let report = store.commit(&Changes::new()).unwrap();
        assert!(!report.changed());
        assert!(!store.path().exists());
    }
}
