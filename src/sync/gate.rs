//! # Admission of server notifications.
//!
//! Notifications arriving while the engine is busy would interleave with
//! the delta the current pass is computing. They are not queued then,
//! the folder is marked dirty instead and the next pass picks the changes up.

use super::queue::WorkQueue;
use super::state::SyncState;
use crate::context::Context;
use crate::events::EventType;
use crate::imap::Notification;

/// Outcome of [`ChangeNotificationGate::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The notification was merged into the work queue.
    Queued,

    /// The folder was marked dirty.
    Deferred,
}

#[derive(Debug, Default)]
pub struct ChangeNotificationGate {
    folder_dirty: bool,
}

impl ChangeNotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a notification was deferred since the folder was last entered.
    pub fn is_dirty(&self) -> bool {
        self.folder_dirty
    }

    /// Called when the folder is entered, the entry observes everything
    /// deferred so far.
    pub fn begin_entry(&mut self) {
        self.folder_dirty = false;
    }

    /// Merges `notification` into `queue` if `state` accepts notifications,
    /// otherwise marks the folder dirty.
    ///
    /// `EXISTS` is always deferred, new messages are found by re-entering the folder.
    pub fn admit(
        &mut self,
        context: &Context,
        folder: &str,
        state: SyncState,
        queue: &mut WorkQueue,
        notification: Notification,
    ) -> Admission {
        match notification {
            Notification::Vanished { uids, .. } if state.accepts_notifications() => {
                for uid in uids {
                    queue.push_deletion(uid);
                }
                Admission::Queued
            }
            Notification::MessageUpdate(change) if state.accepts_notifications() => {
                queue.push_flag_change(change);
                Admission::Queued
            }
            notification => {
                if !self.folder_dirty {
                    info!(
                        context,
                        "Folder {folder} got {notification:?} in state {state:?}, marking it dirty."
                    );
                    context.emit_event(EventType::FolderDirty {
                        folder: folder.to_string(),
                    });
                }
                self.folder_dirty = true;
                Admission::Deferred
            }
        }
    }
}
