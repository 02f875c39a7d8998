//! # Message storage interface.
//!
//! All mutations are idempotent, applying one twice leaves the store
//! as applying it once.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use parking_lot::Mutex;

use crate::bodystructure::Attachment;
use crate::imap::FlagChange;
use crate::sync::FolderSyncState;

/// A message as handed over to the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub uid: u32,
    pub flags: BTreeSet<String>,

    /// MODSEQ the flags were read at, if known.
    pub modseq: Option<u64>,

    pub headers: Vec<(String, String)>,

    /// Sections fetched as displayable text.
    pub body_part_ids: Vec<String>,

    /// Fetched text bodies, still transfer-encoded, by section.
    pub bodies: BTreeMap<String, Vec<u8>>,

    pub attachments: Vec<Attachment>,
}

/// Persistent storage of messages and folder states.
///
/// Writes of one folder are serialized by the caller.
#[allow(async_fn_in_trait)]
pub trait MessageStore {
    /// Returns the persisted state of a folder, `None` if it was never synced.
    async fn folder_state(&self, folder: &str) -> Result<Option<FolderSyncState>>;

    async fn set_folder_state(&self, folder: &str, state: &FolderSyncState) -> Result<()>;

    /// UIDs of all stored messages of the folder.
    async fn known_uids(&self, folder: &str) -> Result<Vec<u32>>;

    /// Inserts a message or replaces the stored record with the same UID.
    async fn upsert_message(&self, folder: &str, record: MessageRecord) -> Result<()>;

    /// Removes a message. Returns false if it was not stored.
    async fn delete_message(&self, folder: &str, uid: u32) -> Result<bool>;

    /// Replaces the flags of a stored message.
    ///
    /// Returns false if the message is not stored or the stored flags are
    /// newer than `change.modseq`.
    async fn update_flags(&self, folder: &str, change: &FlagChange) -> Result<bool>;

    /// Removes all messages of the folder, used when UIDVALIDITY changes.
    async fn purge_folder(&self, folder: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryFolder {
    state: Option<FolderSyncState>,
    messages: BTreeMap<u32, MessageRecord>,
}

/// [`MessageStore`] keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    folders: Mutex<BTreeMap<String, MemoryFolder>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a stored message.
    pub fn message(&self, folder: &str, uid: u32) -> Option<MessageRecord> {
        self.folders
            .lock()
            .get(folder)
            .and_then(|f| f.messages.get(&uid))
            .cloned()
    }

    pub fn message_count(&self, folder: &str) -> usize {
        self.folders
            .lock()
            .get(folder)
            .map_or(0, |f| f.messages.len())
    }

    /// Stored UIDs in ascending order.
    pub fn uids(&self, folder: &str) -> Vec<u32> {
        self.folders
            .lock()
            .get(folder)
            .map(|f| f.messages.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl MessageStore for MemoryStore {
    async fn folder_state(&self, folder: &str) -> Result<Option<FolderSyncState>> {
        Ok(self.folders.lock().get(folder).and_then(|f| f.state))
    }

    async fn set_folder_state(&self, folder: &str, state: &FolderSyncState) -> Result<()> {
        self.folders
            .lock()
            .entry(folder.to_string())
            .or_default()
            .state = Some(*state);
        Ok(())
    }

    async fn known_uids(&self, folder: &str) -> Result<Vec<u32>> {
        Ok(self.uids(folder))
    }

    async fn upsert_message(&self, folder: &str, record: MessageRecord) -> Result<()> {
        self.folders
            .lock()
            .entry(folder.to_string())
            .or_default()
            .messages
            .insert(record.uid, record);
        Ok(())
    }

    async fn delete_message(&self, folder: &str, uid: u32) -> Result<bool> {
        Ok(self
            .folders
            .lock()
            .get_mut(folder)
            .and_then(|f| f.messages.remove(&uid))
            .is_some())
    }

    async fn update_flags(&self, folder: &str, change: &FlagChange) -> Result<bool> {
        let mut folders = self.folders.lock();
        let Some(record) = folders
            .get_mut(folder)
            .and_then(|f| f.messages.get_mut(&change.uid))
        else {
            return Ok(false);
        };
        if let (Some(stored), Some(new)) = (record.modseq, change.modseq) {
            if new < stored {
                return Ok(false);
            }
        }
        record.flags.clone_from(&change.flags);
        record.modseq = change.modseq.or(record.modseq);
        Ok(true)
    }

    async fn purge_folder(&self, folder: &str) -> Result<()> {
        if let Some(f) = self.folders.lock().get_mut(folder) {
            f.messages.clear();
        }
        Ok(())
    }
}
