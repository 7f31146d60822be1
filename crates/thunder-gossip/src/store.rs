//! Known-address store with atomic check-and-insert.
//!
//! The store answers "is this announcement new?" and records it in the same critical
//! section. Splitting the check from the insert would let two connections both see a
//! key as new and flood it twice.

use crate::announcement::AddressAnnouncement;
use crate::error::{GossipError, GossipResult};
use crate::message::{InventoryDigest, InventoryEntry};
use crate::protocol::NodeId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to do with an announcement for a key that is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// The first stored announcement wins; later ones are duplicates.
    #[default]
    KeepFirst,
    /// A strictly newer timestamp replaces the stored entry and counts as new.
    PreferNewer,
}

/// Result of [`AddressStore::insert_if_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First announcement for this key.
    Inserted,
    /// Replaced an older announcement for this key.
    Replaced {
        /// Timestamp of the replaced entry.
        previous_timestamp: i64,
    },
    /// Already known; nothing changed.
    Known,
}

impl InsertOutcome {
    /// Returns true if the store changed and the announcement should be propagated.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        !matches!(self, Self::Known)
    }
}

/// Durable set of announcements keyed by announcing node.
pub trait AddressStore: Send + Sync + fmt::Debug {
    /// Atomically records `announcement` if it is new under the store's policy.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::Store`] if the backing storage fails; in that case the
    /// announcement must be treated as not stored.
    fn insert_if_new(&self, announcement: &AddressAnnouncement) -> GossipResult<InsertOutcome>;

    /// Returns the stored announcement for a node.
    fn get(&self, node_id: &NodeId) -> GossipResult<Option<AddressAnnouncement>>;

    /// Returns every stored announcement.
    fn snapshot(&self) -> GossipResult<Vec<AddressAnnouncement>>;

    /// Returns the number of stored announcements.
    fn len(&self) -> GossipResult<usize>;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> GossipResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns true if the node is known.
    fn contains(&self, node_id: &NodeId) -> GossipResult<bool> {
        Ok(self.get(node_id)?.is_some())
    }

    /// Summarises the store as an inventory digest.
    fn inventory(&self) -> GossipResult<InventoryDigest> {
        let mut entries: Vec<_> = self
            .snapshot()?
            .iter()
            .map(|a| InventoryEntry {
                node_id: a.node_id(),
                timestamp: a.timestamp(),
            })
            .collect();
        entries.sort_by_key(|e| e.node_id);
        Ok(InventoryDigest::new(entries))
    }
}

/// Decides the outcome for an incoming announcement, given what is stored.
fn decide(
    policy: ReplacePolicy,
    existing: Option<&AddressAnnouncement>,
    incoming: &AddressAnnouncement,
) -> InsertOutcome {
    match (existing, policy) {
        (None, _) => InsertOutcome::Inserted,
        (Some(stored), ReplacePolicy::PreferNewer) if incoming.timestamp() > stored.timestamp() => {
            InsertOutcome::Replaced {
                previous_timestamp: stored.timestamp(),
            }
        }
        (Some(_), _) => InsertOutcome::Known,
    }
}

/// In-memory address store.
#[derive(Debug, Default)]
pub struct MemoryAddressStore {
    policy: ReplacePolicy,
    entries: RwLock<HashMap<NodeId, AddressAnnouncement>>,
}

impl MemoryAddressStore {
    /// Creates an empty store with the given policy.
    #[must_use]
    pub fn new(policy: ReplacePolicy) -> Self {
        Self {
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the replace policy.
    #[must_use]
    pub const fn policy(&self) -> ReplacePolicy {
        self.policy
    }
}

impl AddressStore for MemoryAddressStore {
    fn insert_if_new(&self, announcement: &AddressAnnouncement) -> GossipResult<InsertOutcome> {
        let mut entries = self.entries.write();
        let outcome = decide(
            self.policy,
            entries.get(&announcement.node_id()),
            announcement,
        );
        if outcome.is_new() {
            entries.insert(announcement.node_id(), announcement.clone());
        }
        Ok(outcome)
    }

    fn get(&self, node_id: &NodeId) -> GossipResult<Option<AddressAnnouncement>> {
        Ok(self.entries.read().get(node_id).cloned())
    }

    fn snapshot(&self) -> GossipResult<Vec<AddressAnnouncement>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn len(&self) -> GossipResult<usize> {
        Ok(self.entries.read().len())
    }
}

/// The journal is rewritten from memory once it holds this many superseded records.
const COMPACT_SLACK: usize = 64;

#[derive(Debug)]
struct Journal {
    entries: HashMap<NodeId, AddressAnnouncement>,
    file: File,
    records: usize,
}

/// Address store persisted as an append-only JSON-lines journal.
///
/// Each accepted announcement appends one line before memory is updated, so a failed
/// write leaves the store unchanged. On open the journal is replayed and the last line
/// for a node wins. Once superseded lines pile up the journal is compacted through a
/// temporary sibling and a rename.
#[derive(Debug)]
pub struct FileAddressStore {
    path: PathBuf,
    policy: ReplacePolicy,
    journal: Mutex<Journal>,
}

impl FileAddressStore {
    /// Opens the store at `path`, replaying the journal if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or holds a malformed record.
    pub fn open(path: impl AsRef<Path>, policy: ReplacePolicy) -> GossipResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        let mut records = 0;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            for (line_no, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let announcement: AddressAnnouncement =
                    serde_json::from_str(line).map_err(|e| {
                        GossipError::Store(format!(
                            "corrupt store file '{}' at line {}: {e}",
                            path.display(),
                            line_no + 1
                        ))
                    })?;
                entries.insert(announcement.node_id(), announcement);
                records += 1;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), entries = entries.len(), records, "opened address store");

        Ok(Self {
            path,
            policy,
            journal: Mutex::new(Journal {
                entries,
                file,
                records,
            }),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(journal: &mut Journal, announcement: &AddressAnnouncement) -> GossipResult<()> {
        let mut line = serde_json::to_vec(announcement)?;
        line.push(b'\n');
        journal.file.write_all(&line)?;
        journal.records += 1;
        Ok(())
    }

    fn compact_if_needed(&self, journal: &mut Journal) -> GossipResult<()> {
        if journal.records <= journal.entries.len() + COMPACT_SLACK {
            return Ok(());
        }

        let mut announcements: Vec<_> = journal.entries.values().collect();
        announcements.sort_by_key(|a| a.node_id());

        let mut contents = Vec::new();
        for announcement in &announcements {
            serde_json::to_writer(&mut contents, announcement)?;
            contents.push(b'\n');
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        journal.file = OpenOptions::new().append(true).open(&self.path)?;
        journal.records = announcements.len();
        debug!(path = %self.path.display(), entries = journal.records, "compacted address store");
        Ok(())
    }
}

impl AddressStore for FileAddressStore {
    fn insert_if_new(&self, announcement: &AddressAnnouncement) -> GossipResult<InsertOutcome> {
        let mut journal = self.journal.lock();
        let outcome = decide(
            self.policy,
            journal.entries.get(&announcement.node_id()),
            announcement,
        );
        if !outcome.is_new() {
            return Ok(outcome);
        }

        Self::append(&mut journal, announcement)
            .map_err(|e| GossipError::Store(format!("failed to persist: {e}")))?;
        journal
            .entries
            .insert(announcement.node_id(), announcement.clone());

        if let Err(e) = self.compact_if_needed(&mut journal) {
            // The journal still holds every record; compaction retries on a later insert.
            warn!(path = %self.path.display(), error = %e, "compaction failed");
        }
        Ok(outcome)
    }

    fn get(&self, node_id: &NodeId) -> GossipResult<Option<AddressAnnouncement>> {
        Ok(self.journal.lock().entries.get(node_id).cloned())
    }

    fn snapshot(&self) -> GossipResult<Vec<AddressAnnouncement>> {
        Ok(self.journal.lock().entries.values().cloned().collect())
    }

    fn len(&self) -> GossipResult<usize> {
        Ok(self.journal.lock().entries.len())
    }
}
