//! # Work queue of a sync pass.

use strum_macros::Display;

use super::daterange::DateRange;
use super::uid_batch::UidRange;
use crate::imap::FlagChange;

/// Category of a [`WorkItem`].
///
/// The declaration order is the scheduling priority.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[strum(serialize_all = "snake_case")]
pub enum WorkKind {
    Deletion,
    FlagChange,
    FetchTarget,
    FilterRange,
    DateRange,
}

/// A unit of work, each one is executed with a single IMAP command
/// or storage operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Message expunged on the server, to be purged from the store.
    Deletion(u32),

    /// Flags changed on the server, to be applied to the stored message.
    FlagChange(FlagChange),

    /// Message which should be fetched and stored.
    FetchTarget(u32),

    /// UIDs not yet classified. Only one batch is searched per unit.
    FilterRange(UidRange),

    /// Backfill window not yet searched.
    DateRange(DateRange),
}

impl WorkItem {
    pub fn kind(&self) -> WorkKind {
        match self {
            WorkItem::Deletion(_) => WorkKind::Deletion,
            WorkItem::FlagChange(_) => WorkKind::FlagChange,
            WorkItem::FetchTarget(_) => WorkKind::FetchTarget,
            WorkItem::FilterRange(_) => WorkKind::FilterRange,
            WorkItem::DateRange(_) => WorkKind::DateRange,
        }
    }

    fn uid(&self) -> Option<u32> {
        match self {
            WorkItem::Deletion(uid) | WorkItem::FetchTarget(uid) => Some(*uid),
            WorkItem::FlagChange(change) => Some(change.uid),
            WorkItem::FilterRange(_) | WorkItem::DateRange(_) => None,
        }
    }
}

/// Pending work of a sync pass.
///
/// Items are taken by strict [`WorkKind`] priority. Within a kind the most
/// recently pushed item is taken first.
#[derive(Debug, Default, Clone)]
pub struct WorkQueue {
    items: Vec<WorkItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Number of queued items of the given kind.
    pub fn count(&self, kind: WorkKind) -> usize {
        self.items.iter().filter(|item| item.kind() == kind).count()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Queues purging of an expunged message.
    ///
    /// Pending flag changes and fetches of the message are dropped.
    pub fn push_deletion(&mut self, uid: u32) {
        self.items.retain(|item| item.uid() != Some(uid));
        self.items.push(WorkItem::Deletion(uid));
    }

    /// Queues a flag change, replacing an older pending change of the same message.
    pub fn push_flag_change(&mut self, change: FlagChange) {
        if self.contains(WorkKind::Deletion, change.uid) {
            return;
        }
        self.items.retain(|item| {
            !(item.kind() == WorkKind::FlagChange && item.uid() == Some(change.uid))
        });
        self.items.push(WorkItem::FlagChange(change));
    }

    /// Queues a message for fetching. Returns false if it is already queued.
    pub fn push_fetch(&mut self, uid: u32) -> bool {
        if self.contains(WorkKind::FetchTarget, uid) || self.contains(WorkKind::Deletion, uid) {
            return false;
        }
        self.items.push(WorkItem::FetchTarget(uid));
        true
    }

    /// Sets the range of unclassified UIDs, extending a pending range.
    pub fn set_filter_range(&mut self, range: UidRange) {
        let pending = self.items.iter().position(|item| item.kind() == WorkKind::FilterRange);
        match pending {
            Some(pos) => {
                if let Some(WorkItem::FilterRange(old)) = self.items.get_mut(pos) {
                    *old = old.union(range);
                }
            }
            None => self.items.push(WorkItem::FilterRange(range)),
        }
    }

    /// Queues backfill windows. They are taken in reverse order.
    pub fn push_date_ranges(&mut self, ranges: impl IntoIterator<Item = DateRange>) {
        self.items
            .extend(ranges.into_iter().map(WorkItem::DateRange));
    }

    /// Kind of the item [`Self::pop_next`] would return.
    pub fn next_kind(&self) -> Option<WorkKind> {
        self.items.iter().map(WorkItem::kind).min()
    }

    /// Removes the next item to work on.
    pub fn pop_next(&mut self) -> Option<WorkItem> {
        let kind = self.next_kind()?;
        let pos = self.items.iter().rposition(|item| item.kind() == kind)?;
        Some(self.items.remove(pos))
    }

    fn contains(&self, kind: WorkKind, uid: u32) -> bool {
        self.items
            .iter()
            .any(|item| item.kind() == kind && item.uid() == Some(uid))
    }
}
