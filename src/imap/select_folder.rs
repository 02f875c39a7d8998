//! # IMAP folder selection module.

use anyhow::Context as _;

use super::{FlagChange, ImapSession, KnownState};
use crate::config::Config;
use crate::context::Context;
use crate::sync::{BoxEntryState, FolderSyncState};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Got a NO response when trying to select {0}, usually this means that it doesn't exist: {1}")]
    NoFolder(String, String),

    #[error("IMAP other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        Error::Other(format!("{err:#}"))
    }
}

/// Result of entering a folder.
#[derive(Debug)]
pub(crate) struct FolderEntry {
    pub state: BoxEntryState,

    /// Expunged UIDs reported by a resynchronizing select.
    pub vanished: Vec<u32>,

    /// Flag changes reported by a resynchronizing select.
    pub changed: Vec<FlagChange>,

    /// True if the folder was synced before with another UIDVALIDITY.
    pub validity_changed: bool,
}

/// Selects `folder`, resynchronizing from `known` if given, and captures
/// its status.
///
/// Falls back to `STATUS` if the server does not report UIDNEXT on select.
pub(crate) async fn enter_folder<S: ImapSession>(
    context: &Context,
    session: &mut S,
    folder: &str,
    known: Option<&KnownState>,
    persisted: Option<&FolderSyncState>,
) -> anyhow::Result<FolderEntry> {
    let read_only = context.get_config_bool(Config::ReadOnly)?;
    let (mailbox, vanished, changed) = match known {
        Some(known) => {
            let response = session
                .resync_folder(folder, read_only, known)
                .await
                .with_context(|| format!("failed to resync folder {folder}"))?;
            (response.mailbox, response.vanished, response.changed)
        }
        None => {
            let mailbox = session
                .select_folder(folder, read_only)
                .await
                .with_context(|| format!("failed to select folder {folder}"))?;
            (mailbox, Vec::new(), Vec::new())
        }
    };

    let new_uid_validity = mailbox
        .uid_validity
        .with_context(|| format!("No UIDVALIDITY for folder {folder}"))?;
    let new_uid_next = if let Some(uid_next) = mailbox.uid_next {
        Some(uid_next)
    } else {
        warn!(
            context,
            "SELECT response for IMAP folder {folder:?} has no UIDNEXT, fall back to STATUS command."
        );

        // RFC 3501 says STATUS command SHOULD NOT be used
        // on the currently selected mailbox, but it also says that
        // UIDNEXT is REQUIRED in the SELECT response.
        let uid_next = session
            .status_uid_next(folder)
            .await
            .with_context(|| format!("STATUS (UIDNEXT) error for {folder:?}"))?;
        if uid_next.is_none() {
            warn!(context, "STATUS {folder} (UIDNEXT) did not return UIDNEXT.");
        }
        uid_next
    };

    let old_uid_next = persisted.map(|state| state.uid_next).unwrap_or_default();
    let old_uid_validity = persisted.map(|state| state.uid_validity).unwrap_or_default();
    let uid_next = new_uid_next.unwrap_or(old_uid_next);

    let state = BoxEntryState {
        uid_next,
        uid_validity: new_uid_validity,
        highest_modseq: mailbox.highest_modseq,
    };

    let validity_changed = persisted.is_some() && new_uid_validity != old_uid_validity;
    if validity_changed {
        info!(
            context,
            "uid/validity change folder {}: new {}/{} previous {}/{}.",
            folder,
            uid_next,
            new_uid_validity,
            old_uid_next,
            old_uid_validity,
        );
        return Ok(FolderEntry {
            state,
            vanished: Vec::new(),
            changed: Vec::new(),
            validity_changed,
        });
    }

    if persisted.is_some() && uid_next < old_uid_next {
        warn!(
            context,
            "The server illegally decreased the uid_next of folder {folder:?} from {old_uid_next} to {uid_next} without changing validity ({new_uid_validity})."
        );
    }

    Ok(FolderEntry {
        state,
        vanished,
        changed,
        validity_changed,
    })
}
