//! # Folder synchronization.
//!
//! A [`FolderSyncEngine`] owns one IMAP session and keeps one folder of it
//! in sync with a [`MessageStore`]. A sync pass enters the folder, turns
//! the entry result into a [`WorkQueue`] and drains the queue one unit at
//! a time, each unit being a single IMAP command or store mutation. The
//! persisted [`FolderSyncState`] is only advanced once the queue is empty,
//! so a failed pass is simply repeated.
//!
//! The first pass of a folder searches it by date ranges, newest first.
//! Later passes resynchronize using QRESYNC if the server supports it and
//! classify the UIDs that appeared since the last pass.

use std::mem;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use chrono::Local;

use crate::config::Config;
use crate::context::Context;
use crate::events::EventType;
use crate::imap::{
    format_uid_set, get_imap_search_command, select_folder, FlagChange, ImapSession, KnownState,
    Notification, SearchCriterion,
};
use crate::store::MessageStore;

pub mod daterange;
pub mod gate;
mod ingest;
pub mod queue;
pub mod state;
pub mod uid_batch;


pub use self::daterange::{plan_date_ranges, DateRange, BACKFILL_WINDOWS};
pub use self::gate::{Admission, ChangeNotificationGate};
pub use self::queue::{WorkItem, WorkKind, WorkQueue};
pub use self::state::{BoxEntryState, EntryMode, FolderSyncState, SyncState};
pub use self::uid_batch::{UidRange, MAX_UIDS_TO_CONSIDER};

/// Violations of the engine's invariants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Illegal sync state transition from {from:?} to {to:?}")]
    IllegalTransition { from: SyncState, to: SyncState },

    #[error("Cannot schedule work, a {active} unit is still active")]
    TaskAlreadyActive { active: WorkKind },

    #[error("Invalid UID range {low}:{high}")]
    InvalidUidRange { low: u32, high: u32 },

    #[error("No folder entered")]
    NoFolder,
}

/// Synchronization engine of a single folder.
#[derive(Debug)]
pub struct FolderSyncEngine<S, M> {
    context: Context,
    session: S,
    store: M,

    /// Folder of the current or last pass.
    folder: Option<String>,

    state: SyncState,
    queue: WorkQueue,
    gate: ChangeNotificationGate,

    /// Mailbox status captured when the folder was entered, folded into
    /// the persisted state when the pass completes.
    entry: Option<BoxEntryState>,

    persisted: Option<FolderSyncState>,

    /// Store mutations issued since the state was last persisted.
    mutations: u64,

    /// Highest MODSEQ of the flag changes applied since the state was last persisted.
    applied_modseq: Option<u64>,
}

impl<S: ImapSession, M: MessageStore> FolderSyncEngine<S, M> {
    pub fn new(context: &Context, session: S, store: M) -> Self {
        Self {
            context: context.clone(),
            session,
            store,
            folder: None,
            state: SyncState::Idle,
            queue: WorkQueue::new(),
            gate: ChangeNotificationGate::new(),
            entry: None,
            persisted: None,
            mutations: 0,
            applied_modseq: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    /// True if a notification was deferred and the folder needs to be re-entered.
    pub fn is_folder_dirty(&self) -> bool {
        self.gate.is_dirty()
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// State persisted by the last completed pass.
    pub fn folder_state(&self) -> Option<&FolderSyncState> {
        self.persisted.as_ref()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn store(&self) -> &M {
        &self.store
    }

    /// Synchronizes `folder`, starting from the state persisted in the store.
    pub async fn sync_folder(&mut self, folder: &str) -> Result<()> {
        let persisted = self
            .store
            .folder_state(folder)
            .await
            .with_context(|| format!("failed to load state of folder {folder}"))?;
        self.begin_sync(folder, persisted).await
    }

    /// Runs a sync pass of `folder`.
    ///
    /// Without `persisted` state the folder is synced from scratch.
    /// On success the engine is [`SyncState::Listening`], on failure
    /// [`SyncState::Idle`] and nothing was persisted.
    pub async fn begin_sync(
        &mut self,
        folder: &str,
        persisted: Option<FolderSyncState>,
    ) -> Result<()> {
        self.state
            .transition(SyncState::Entering(EntryMode::Plain))?;
        self.folder = Some(folder.to_string());
        self.persisted = persisted;
        self.run_pass().await?;
        self.reenter_while_dirty().await
    }

    /// Re-enters the current folder, e.g. after a failed pass.
    pub async fn resync(&mut self) -> Result<()> {
        self.run_pass().await?;
        self.reenter_while_dirty().await
    }

    /// Handles a `VANISHED` response.
    pub async fn on_vanished(&mut self, uids: Vec<u32>, earlier: bool) -> Result<()> {
        self.handle_notifications(vec![Notification::Vanished { uids, earlier }])
            .await
    }

    /// Handles an unsolicited `FETCH` response with new flags.
    pub async fn on_message_update(&mut self, change: FlagChange) -> Result<()> {
        self.handle_notifications(vec![Notification::MessageUpdate(change)])
            .await
    }

    /// Waits in IDLE for server notifications and handles them.
    ///
    /// IDLE is given up after [`Config::IdleTimeout`] seconds, the caller is
    /// expected to call this again.
    pub async fn idle(&mut self) -> Result<()> {
        if self.state != SyncState::Listening {
            bail!("Cannot IDLE in state {:?}", self.state);
        }
        let folder = self.folder.clone().ok_or(Error::NoFolder)?;
        let timeout = Duration::from_secs(u64::from(
            self.context.get_config_u32(Config::IdleTimeout)?,
        ));

        info!(self.context, "{folder}: Idle entering wait-on-remote state");
        let notifications = match tokio::time::timeout(timeout, self.session.idle()).await {
            Ok(res) => res.with_context(|| format!("IDLE failed in folder {folder}"))?,
            Err(_) => {
                info!(self.context, "{folder}: Idle wait timed out.");
                Vec::new()
            }
        };
        self.handle_notifications(notifications).await
    }

    async fn handle_notifications(&mut self, notifications: Vec<Notification>) -> Result<()> {
        let Some(folder) = self.folder.clone() else {
            info!(self.context, "No folder entered, ignoring notifications.");
            return Ok(());
        };

        let mut queued = false;
        for notification in notifications {
            queued |= self.admit(&folder, notification) == Admission::Queued;
        }
        if queued {
            // Only a listening engine queues notifications.
            self.set_state(SyncState::Draining { active: None })?;
            if let Err(err) = self.drain(&folder).await {
                self.abort_pass();
                return Err(err);
            }
        }
        self.reenter_while_dirty().await
    }

    /// Re-enters the folder while it was marked dirty during the last pass.
    async fn reenter_while_dirty(&mut self) -> Result<()> {
        let max_reentries = self.context.get_config_u32(Config::MaxReentries)?;
        let mut reentries = 0;
        while self.state == SyncState::Listening && self.gate.is_dirty() {
            if reentries >= max_reentries {
                warn!(
                    self.context,
                    "Folder {} is still dirty after {reentries} re-entries, giving up for now.",
                    self.folder.as_deref().unwrap_or_default()
                );
                break;
            }
            reentries += 1;
            self.run_pass().await?;
        }
        Ok(())
    }

    async fn run_pass(&mut self) -> Result<()> {
        let folder = self.folder.clone().ok_or(Error::NoFolder)?;
        let mode = match self.persisted {
            Some(FolderSyncState {
                modseq: Some(_), ..
            }) if self.session.can_qresync() => EntryMode::Resync,
            _ => EntryMode::Plain,
        };
        self.set_state(SyncState::Entering(mode))?;
        self.gate.begin_entry();
        self.queue.clear();
        self.entry = None;
        self.mutations = 0;
        self.applied_modseq = None;

        if let Err(err) = self.enter(&folder, mode).await {
            self.abort_pass();
            return Err(err);
        }
        self.set_state(SyncState::Draining { active: None })?;
        if let Err(err) = self.drain(&folder).await {
            self.abort_pass();
            return Err(err);
        }
        Ok(())
    }

    /// Enters the folder and populates the work queue from the entry result.
    async fn enter(&mut self, folder: &str, mode: EntryMode) -> Result<()> {
        let known = match (mode, self.persisted) {
            (EntryMode::Resync, Some(persisted)) => {
                let uids = self
                    .store
                    .known_uids(folder)
                    .await
                    .with_context(|| format!("failed to load known UIDs of {folder}"))?;
                Some(KnownState {
                    uid_validity: persisted.uid_validity,
                    modseq: persisted.modseq.unwrap_or_default(),
                    known_uids: format_uid_set(&uids),
                })
            }
            _ => None,
        };

        let entry = select_folder::enter_folder(
            &self.context,
            &mut self.session,
            folder,
            known.as_ref(),
            self.persisted.as_ref(),
        )
        .await?;

        if entry.validity_changed {
            self.store
                .purge_folder(folder)
                .await
                .with_context(|| format!("failed to purge folder {folder}"))?;
            self.mutations += 1;
        }

        match self.persisted {
            Some(persisted) if !entry.validity_changed => {
                if mode == EntryMode::Plain {
                    info!(
                        self.context,
                        "Folder {folder} entered without QRESYNC, only new messages are synced."
                    );
                }
                for uid in entry.vanished {
                    self.queue.push_deletion(uid);
                }
                for change in entry.changed {
                    self.queue.push_flag_change(change);
                }
                let low = persisted.uid_next.max(1);
                if low < entry.state.uid_next {
                    self.queue
                        .set_filter_range(UidRange::new(low, entry.state.uid_next - 1)?);
                }
            }
            _ => {
                let windows = self
                    .context
                    .get_config_parsed::<usize>(Config::BackfillWindows)?
                    .unwrap_or(BACKFILL_WINDOWS);
                info!(
                    self.context,
                    "Syncing folder {folder} from scratch, searching {windows} date ranges."
                );
                self.queue
                    .push_date_ranges(plan_date_ranges(Local::now().date_naive(), windows));
            }
        }

        self.entry = Some(entry.state);
        Ok(())
    }

    /// Runs queued units until the queue is empty, then persists the folder state.
    async fn drain(&mut self, folder: &str) -> Result<()> {
        loop {
            for notification in self.session.drain_unsolicited() {
                self.admit(folder, notification);
            }

            let Some(item) = self.schedule_next()? else {
                break;
            };
            let res = self.run_unit(folder, item).await;
            self.set_state(SyncState::Draining { active: None })?;
            res?;
        }
        self.finish_pass(folder).await
    }

    /// Takes the next unit of work and marks it active.
    ///
    /// Returns `None` if the queue is drained.
    pub(crate) fn schedule_next(&mut self) -> Result<Option<WorkItem>, Error> {
        let Some(kind) = self.queue.next_kind() else {
            return Ok(None);
        };
        self.set_state(SyncState::Draining { active: Some(kind) })?;
        Ok(self.queue.pop_next())
    }

    async fn run_unit(&mut self, folder: &str, item: WorkItem) -> Result<()> {
        match item {
            WorkItem::Deletion(uid) => {
                let deleted = self.store.delete_message(folder, uid).await?;
                self.mutations += 1;
                if deleted {
                    self.context.emit_event(EventType::MessageDeleted {
                        folder: folder.to_string(),
                        uid,
                    });
                }
            }
            WorkItem::FlagChange(change) => {
                let applied = self.store.update_flags(folder, &change).await?;
                self.mutations += 1;
                self.applied_modseq = self.applied_modseq.max(change.modseq);
                if applied {
                    self.context.emit_event(EventType::FlagsChanged {
                        folder: folder.to_string(),
                        uid: change.uid,
                    });
                }
            }
            WorkItem::FetchTarget(uid) => {
                let stored = ingest::fetch_message(
                    &self.context,
                    &mut self.session,
                    &self.store,
                    folder,
                    uid,
                )
                .await?;
                if stored {
                    self.mutations += 1;
                }
            }
            WorkItem::FilterRange(range) => {
                let max_uids = self
                    .context
                    .get_config_parsed::<u32>(Config::MaxUidsToConsider)?
                    .unwrap_or(MAX_UIDS_TO_CONSIDER);
                let (batch, remaining) = range.next_batch(max_uids);
                if let Some(remaining) = remaining {
                    self.queue.set_filter_range(remaining);
                }
                let mut criteria = self.base_criteria()?;
                criteria.push(SearchCriterion::Uid(batch));
                let uids = self.search(folder, &criteria).await?;
                self.queue_fetches(folder, uids, Some(batch));
            }
            WorkItem::DateRange(range) => {
                let mut criteria = self.base_criteria()?;
                criteria.extend(range.search_criteria());
                let uids = self.search(folder, &criteria).await?;
                self.queue_fetches(folder, uids, None);
            }
        }
        Ok(())
    }

    fn base_criteria(&self) -> Result<Vec<SearchCriterion>> {
        let mut criteria = Vec::new();
        if self.context.get_config_bool(Config::ExcludeDrafts)? {
            criteria.push(SearchCriterion::NotDraft);
        }
        Ok(criteria)
    }

    async fn search(&mut self, folder: &str, criteria: &[SearchCriterion]) -> Result<Vec<u32>> {
        let command = get_imap_search_command(criteria);
        self.session
            .uid_search(criteria)
            .await
            .with_context(|| format!("UID SEARCH {command} failed in folder {folder}"))
    }

    /// Queues search results for fetching. UIDs outside `range` are ignored,
    /// some servers return the highest UID for ranges beyond it.
    fn queue_fetches(&mut self, folder: &str, mut uids: Vec<u32>, range: Option<UidRange>) {
        uids.sort_unstable();
        let mut queued = 0;
        for uid in uids {
            if range.is_some_and(|range| !range.contains(uid)) {
                continue;
            }
            if self.queue.push_fetch(uid) {
                queued += 1;
            }
        }
        if queued > 0 {
            info!(self.context, "{queued} messages to fetch in folder {folder}.");
        }
    }

    /// Persists the folder state after the queue was drained.
    async fn finish_pass(&mut self, folder: &str) -> Result<()> {
        let mut entry = match self.entry.take() {
            Some(entry) => entry,
            None => self
                .persisted
                .as_ref()
                .map(BoxEntryState::from)
                .ok_or(Error::NoFolder)?,
        };
        entry.highest_modseq = entry.highest_modseq.max(self.applied_modseq);

        let state = FolderSyncState::advance(self.persisted.as_ref(), &entry, self.mutations);
        self.store
            .set_folder_state(folder, &state)
            .await
            .with_context(|| format!("failed to persist state of folder {folder}"))?;
        self.persisted = Some(state);
        self.mutations = 0;
        self.applied_modseq = None;

        self.set_state(SyncState::Listening)?;
        self.context.emit_event(EventType::FolderSynced {
            folder: folder.to_string(),
            uid_next: state.uid_next,
        });
        Ok(())
    }

    fn admit(&mut self, folder: &str, notification: Notification) -> Admission {
        self.gate.admit(
            &self.context,
            folder,
            self.state,
            &mut self.queue,
            notification,
        )
    }

    /// Abandons the current pass after an error. The next pass starts
    /// from the persisted state again.
    fn abort_pass(&mut self) {
        self.queue.clear();
        self.entry = None;
        if self.state != SyncState::Idle {
            // Every state may fall back to Idle.
            self.state = SyncState::Idle;
            self.emit_state();
        }
    }

    fn set_state(&mut self, next: SyncState) -> Result<(), Error> {
        let previous = self.state;
        self.state = previous.transition(next)?;
        if mem::discriminant(&previous) != mem::discriminant(&next) {
            self.emit_state();
        }
        Ok(())
    }

    fn emit_state(&self) {
        self.context.emit_event(EventType::SyncStateChanged {
            folder: self.folder.clone().unwrap_or_default(),
            state: self.state,
        });
    }
}
