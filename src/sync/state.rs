//! # Sync states.

use serde::{Deserialize, Serialize};

use super::queue::WorkKind;
use super::Error;

/// Persisted state of a folder.
///
/// Written only after a sync pass drained its work queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSyncState {
    /// UIDNEXT of the last completed pass. All UIDs below it are classified.
    pub uid_next: u32,

    pub uid_validity: u32,

    /// Highest MODSEQ known to be applied, `None` if the server has no CONDSTORE.
    pub modseq: Option<u64>,

    /// First store mutation not yet confirmed as applied.
    pub first_unprocessed_mutation_id: u64,

    /// ID the next store mutation will get.
    pub next_mutation_id: u64,
}

impl FolderSyncState {
    /// Folds a completed pass into the state.
    ///
    /// `mutations` is the number of store mutations issued by the pass,
    /// all of them are applied when the state is written.
    pub fn advance(previous: Option<&FolderSyncState>, entry: &BoxEntryState, mutations: u64) -> Self {
        let next_mutation_id = previous
            .map(|state| state.next_mutation_id)
            .unwrap_or_default()
            .saturating_add(mutations);
        Self {
            uid_next: entry.uid_next,
            uid_validity: entry.uid_validity,
            modseq: entry.highest_modseq,
            first_unprocessed_mutation_id: next_mutation_id,
            next_mutation_id,
        }
    }
}

/// Mailbox status captured right after the folder was entered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BoxEntryState {
    pub uid_next: u32,
    pub uid_validity: u32,
    pub highest_modseq: Option<u64>,
}

impl From<&FolderSyncState> for BoxEntryState {
    fn from(state: &FolderSyncState) -> Self {
        Self {
            uid_next: state.uid_next,
            uid_validity: state.uid_validity,
            highest_modseq: state.modseq,
        }
    }
}

/// How a folder is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// SELECT or EXAMINE, used for the first sync and by servers without QRESYNC.
    Plain,

    /// SELECT with QRESYNC parameters.
    Resync,
}

/// State of a [`FolderSyncEngine`](super::FolderSyncEngine).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No folder entered.
    #[default]
    Idle,

    /// SELECT in flight.
    Entering(EntryMode),

    /// Work queue is being drained, `active` is the kind of the unit in flight.
    Draining { active: Option<WorkKind> },

    /// Queue drained, server notifications are applied as they arrive.
    Listening,
}

impl SyncState {
    /// Validates a transition and returns the new state.
    pub fn transition(self, next: SyncState) -> Result<SyncState, Error> {
        use SyncState::{Draining, Entering, Idle, Listening};

        let allowed = match (self, next) {
            (Idle | Listening, Entering(_)) => true,
            (Entering(_), Draining { active: None }) => true,
            (Draining { active: None }, Draining { active: Some(_) }) => true,
            (Draining { active: Some(active) }, Draining { active: Some(_) }) => {
                return Err(Error::TaskAlreadyActive { active });
            }
            (Draining { active: Some(_) }, Draining { active: None }) => true,
            (Draining { active: None }, Listening) => true,
            (Listening, Draining { active: None }) => true,
            (Entering(_) | Draining { .. } | Listening, Idle) => true,
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(Error::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Only a listening engine applies notifications, all other states
    /// defer them to the next pass.
    pub fn accepts_notifications(&self) -> bool {
        matches!(self, SyncState::Listening)
    }
}
