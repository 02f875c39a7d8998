//! # IMAP session interface.
//!
//! The engine does not speak IMAP itself. The caller provides an
//! [`ImapSession`] which issues the commands and parses the responses
//! into the types of this module.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::Result;
use chrono::NaiveDate;

use crate::bodystructure::BodyStructure;
use crate::sync::UidRange;

pub mod select_folder;

/// Status of a selected mailbox, as reported by SELECT or EXAMINE.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// `UIDNEXT` response code. Some servers omit it.
    pub uid_next: Option<u32>,

    /// `UIDVALIDITY` response code.
    pub uid_validity: Option<u32>,

    /// `HIGHESTMODSEQ` response code, only sent by servers supporting CONDSTORE.
    pub highest_modseq: Option<u64>,
}

/// Parameters of a `SELECT ... (QRESYNC (...))` command,
/// see <https://tools.ietf.org/html/rfc7162#section-3.2.5>.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownState {
    pub uid_validity: u32,
    pub modseq: u64,

    /// Known UIDs in sequence-set syntax, empty if no message is known.
    pub known_uids: String,
}

/// Response to a resynchronizing select.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResyncResponse {
    pub mailbox: Mailbox,

    /// UIDs reported by `VANISHED (EARLIER)`.
    pub vanished: Vec<u32>,

    /// Flags of messages changed since the known MODSEQ.
    pub changed: Vec<FlagChange>,
}

/// New flags of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagChange {
    pub uid: u32,
    pub flags: BTreeSet<String>,
    pub modseq: Option<u64>,
}

/// Result of the first fetch pass: headers and body structure without body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedStructure {
    pub uid: u32,
    pub flags: BTreeSet<String>,

    /// `MODSEQ` of the message, only sent by servers supporting CONDSTORE.
    pub modseq: Option<u64>,

    pub headers: Vec<(String, String)>,
    pub structure: BodyStructure,
}

/// Unsolicited server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `VANISHED` response, `earlier` is set for `VANISHED (EARLIER)`.
    Vanished { uids: Vec<u32>, earlier: bool },

    /// Unsolicited `FETCH` with new flags.
    MessageUpdate(FlagChange),

    /// `EXISTS` response, the mailbox has a new message count.
    Exists(u32),
}

/// Predicate of a `UID SEARCH` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCriterion {
    /// `NOT DRAFT`
    NotDraft,

    /// `SINCE <date>`, inclusive.
    Since(NaiveDate),

    /// `BEFORE <date>`, exclusive.
    Before(NaiveDate),

    /// `UID <low>:<high>`
    Uid(UidRange),
}

impl fmt::Display for SearchCriterion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotDraft => write!(f, "NOT DRAFT"),
            Self::Since(date) => write!(f, "SINCE {}", imap_date(*date)),
            Self::Before(date) => write!(f, "BEFORE {}", imap_date(*date)),
            Self::Uid(range) => write!(f, "UID {range}"),
        }
    }
}

/// Formats a date as `date` production of RFC 3501, e.g. `1-Feb-2024`.
fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// Returns the arguments of a `UID SEARCH` command matching all criteria.
pub fn get_imap_search_command(criteria: &[SearchCriterion]) -> String {
    if criteria.is_empty() {
        return "ALL".to_string();
    }
    criteria
        .iter()
        .map(|criterion| criterion.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats UIDs as an IMAP sequence set, collapsing consecutive UIDs into ranges.
pub fn format_uid_set(uids: &[u32]) -> String {
    let uids: BTreeSet<u32> = uids.iter().copied().collect();

    // first, try to find consecutive ranges:
    let mut ranges: Vec<UidRange> = vec![];
    for current in uids {
        if let Some(last) = ranges.last_mut() {
            if last.high.checked_add(1) == Some(current) {
                last.high = current;
                continue;
            }
        }
        ranges.push(UidRange {
            low: current,
            high: current,
        });
    }

    ranges
        .iter()
        .map(|range| range.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// An authenticated IMAP session.
///
/// All methods are called sequentially, the engine never has more than
/// one command in flight.
#[allow(async_fn_in_trait)]
pub trait ImapSession {
    /// True if the server has QRESYNC capability as defined in
    /// <https://tools.ietf.org/html/rfc7162>
    fn can_qresync(&self) -> bool;

    /// Selects a folder with SELECT, or EXAMINE if `read_only` is set.
    async fn select_folder(
        &mut self,
        folder: &str,
        read_only: bool,
    ) -> std::result::Result<Mailbox, select_folder::Error>;

    /// Selects a folder passing QRESYNC parameters.
    ///
    /// The server reports messages expunged and flags changed since `known.modseq`.
    async fn resync_folder(
        &mut self,
        folder: &str,
        read_only: bool,
        known: &KnownState,
    ) -> std::result::Result<ResyncResponse, select_folder::Error>;

    /// Issues `STATUS <folder> (UIDNEXT)`.
    async fn status_uid_next(&mut self, folder: &str) -> Result<Option<u32>>;

    /// Issues `UID SEARCH` in the selected folder.
    async fn uid_search(&mut self, criteria: &[SearchCriterion]) -> Result<Vec<u32>>;

    /// Fetches flags, headers and `BODYSTRUCTURE` of one message.
    ///
    /// Returns `None` if the server returned no FETCH response for the UID.
    async fn fetch_structure(&mut self, uid: u32) -> Result<Option<FetchedStructure>>;

    /// Fetches `BODY.PEEK[<part>]` for each of the given parts.
    async fn fetch_body_parts(
        &mut self,
        uid: u32,
        part_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>>;

    /// Takes unsolicited responses received while executing previous commands.
    fn drain_unsolicited(&mut self) -> Vec<Notification>;

    /// Runs IDLE until the server sends something.
    ///
    /// The engine bounds the call with a timeout and drops the future
    /// when it expires.
    async fn idle(&mut self) -> Result<Vec<Notification>>;
}
