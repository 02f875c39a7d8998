//! # Message ingestion.
//!
//! The first pass fetches the structure, the second pass fetches the
//! selected text parts. Attachments are recorded by reference only.

use anyhow::{Context as _, Result};

use crate::bodystructure::select_parts;
use crate::context::Context;
use crate::events::EventType;
use crate::imap::ImapSession;
use crate::log::LogExt;
use crate::store::{MessageRecord, MessageStore};

/// Fetches one message and hands it over to the store.
///
/// Returns true if the store was written. A failed structure fetch is
/// logged and the message is skipped: the UID is not stored yet, so it is
/// most likely expunged. Once the structure was fetched the message
/// exists, so a failed body fetch aborts the pass and the message is
/// fetched again by the next one.
pub(crate) async fn fetch_message<S: ImapSession, M: MessageStore>(
    context: &Context,
    session: &mut S,
    store: &M,
    folder: &str,
    uid: u32,
) -> Result<bool> {
    let fetched = match session
        .fetch_structure(uid)
        .await
        .with_context(|| format!("Failed to fetch structure of {folder}/{uid}, skipping"))
        .log(context)
    {
        Some(Some(fetched)) => fetched,
        Some(None) => {
            info!(context, "Message {folder}/{uid} was not returned by FETCH, skipping.");
            return Ok(false);
        }
        None => return Ok(false),
    };

    let selection = select_parts(&fetched.structure);
    let bodies = if selection.body_parts.is_empty() {
        Default::default()
    } else {
        session
            .fetch_body_parts(uid, &selection.body_parts)
            .await
            .with_context(|| format!("failed to fetch body of {folder}/{uid}"))?
    };

    let record = MessageRecord {
        uid,
        flags: fetched.flags,
        modseq: fetched.modseq,
        headers: fetched.headers,
        body_part_ids: selection.body_parts,
        bodies,
        attachments: selection.attachments,
    };
    store.upsert_message(folder, record).await?;
    context.emit_event(EventType::MessageIngested {
        folder: folder.to_string(),
        uid,
    });
    Ok(true)
}
