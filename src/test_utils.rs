//! Utilities to help writing tests.
//!
//! This module is only compiled for test runs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::ops::Deref;

use anyhow::{bail, Result};
use chrono::NaiveDate;

use crate::bodystructure::BodyStructure;
use crate::context::Context;
use crate::events::{EventEmitter, EventType};
use crate::imap::select_folder;
use crate::imap::{
    get_imap_search_command, FetchedStructure, FlagChange, ImapSession, KnownState, Mailbox,
    Notification, ResyncResponse, SearchCriterion,
};

/// A Context collecting its events.
pub(crate) struct TestContext {
    pub ctx: Context,
    events: EventEmitter,
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("id", &self.ctx.get_id())
            .finish()
    }
}

impl TestContext {
    pub fn new() -> Self {
        let ctx = Context::new();
        let events = ctx.get_event_emitter();
        Self { ctx, events }
    }

    /// Returns the first pending event matching `pred`, dropping the events before it.
    ///
    /// Panics if no pending event matches.
    pub fn get_event<F>(&self, pred: F) -> EventType
    where
        F: Fn(&EventType) -> bool,
    {
        while let Some(event) = self.events.try_recv() {
            if pred(&event.typ) {
                return event.typ;
            }
        }
        panic!("no matching event emitted");
    }

    /// Takes all pending events.
    pub fn drain_events(&self) -> Vec<EventType> {
        std::iter::from_fn(|| self.events.try_recv())
            .map(|event| event.typ)
            .collect()
    }
}

impl Deref for TestContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

/// A message on the [`FakeSession`] server.
#[derive(Debug, Clone)]
pub(crate) struct FakeMessage {
    pub date: NaiveDate,
    pub flags: BTreeSet<String>,
    pub modseq: u64,
    pub structure: BodyStructure,
    pub parts: BTreeMap<String, Vec<u8>>,
}

/// Scripted IMAP server of one folder.
///
/// Every command is recorded in `log`. MODSEQ is raised by every change
/// of the folder, like a CONDSTORE server does.
#[derive(Debug)]
pub(crate) struct FakeSession {
    pub uid_validity: u32,
    pub uid_next: u32,
    pub highest_modseq: u64,
    pub condstore: bool,
    pub qresync: bool,

    /// Report UIDNEXT on SELECT. If unset, it is only returned by STATUS.
    pub report_uid_next: bool,

    /// Returned by SELECT instead of the actual status.
    pub mailbox_override: Option<Mailbox>,

    pub fail_select: bool,
    pub fail_search: bool,
    pub fail_structure: BTreeSet<u32>,
    pub fail_body: BTreeSet<u32>,

    pub messages: BTreeMap<u32, FakeMessage>,

    /// Expunged UIDs with the MODSEQ of the expunge.
    pub expunged: Vec<(u32, u64)>,

    /// Unsolicited responses returned by the next `drain_unsolicited()`.
    pub unsolicited: Vec<Notification>,

    /// Returned by every UID SEARCH in addition to the matches,
    /// like servers answering `UID n:*` with the highest UID.
    pub extra_search_results: Vec<u32>,

    /// Fetching the structure of the key expunges the value,
    /// the server reports it with an unsolicited `VANISHED`.
    pub expunge_on_fetch: BTreeMap<u32, u32>,

    /// Responses to IDLE. IDLE never returns once they run out.
    pub idle_responses: VecDeque<Vec<Notification>>,

    pub log: Vec<String>,
}

impl FakeSession {
    pub fn new(uid_validity: u32) -> Self {
        Self {
            uid_validity,
            uid_next: 1,
            highest_modseq: 0,
            condstore: true,
            qresync: true,
            report_uid_next: true,
            mailbox_override: None,
            fail_select: false,
            fail_search: false,
            fail_structure: BTreeSet::new(),
            fail_body: BTreeSet::new(),
            messages: BTreeMap::new(),
            expunged: Vec::new(),
            unsolicited: Vec::new(),
            extra_search_results: Vec::new(),
            expunge_on_fetch: BTreeMap::new(),
            idle_responses: VecDeque::new(),
            log: Vec::new(),
        }
    }

    fn next_modseq(&mut self) -> u64 {
        self.highest_modseq += 1;
        self.highest_modseq
    }

    /// Appends a message dated `date` (`YYYY-MM-DD`), returns its UID.
    pub fn add_message(
        &mut self,
        date: &str,
        flags: &[&str],
        structure: BodyStructure,
        parts: &[(&str, &str)],
    ) -> u32 {
        let uid = self.uid_next;
        self.uid_next += 1;
        let modseq = self.next_modseq();
        self.messages.insert(
            uid,
            FakeMessage {
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                flags: flags.iter().map(|flag| flag.to_string()).collect(),
                modseq,
                structure,
                parts: parts
                    .iter()
                    .map(|(id, body)| (id.to_string(), body.as_bytes().to_vec()))
                    .collect(),
            },
        );
        uid
    }

    /// Appends a single part `text/plain` message.
    pub fn add_plain_message(&mut self, date: &str) -> u32 {
        self.add_message(
            date,
            &[],
            BodyStructure::leaf("1", "text", "plain"),
            &[("1", "hello")],
        )
    }

    pub fn add_draft(&mut self, date: &str) -> u32 {
        self.add_message(
            date,
            &["\\Draft"],
            BodyStructure::leaf("1", "text", "plain"),
            &[("1", "draft")],
        )
    }

    pub fn expunge(&mut self, uid: u32) {
        if self.messages.remove(&uid).is_some() {
            let modseq = self.next_modseq();
            self.expunged.push((uid, modseq));
        }
    }

    pub fn set_flags(&mut self, uid: u32, flags: &[&str]) {
        let modseq = self.next_modseq();
        if let Some(message) = self.messages.get_mut(&uid) {
            message.flags = flags.iter().map(|flag| flag.to_string()).collect();
            message.modseq = modseq;
        }
    }

    /// Number of logged commands containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.log
            .iter()
            .filter(|command| command.contains(pattern))
            .count()
    }

    fn mailbox(&self) -> Mailbox {
        self.mailbox_override.clone().unwrap_or(Mailbox {
            uid_next: self.report_uid_next.then_some(self.uid_next),
            uid_validity: Some(self.uid_validity),
            highest_modseq: self.condstore.then_some(self.highest_modseq),
        })
    }

    fn select_command(
        &mut self,
        folder: &str,
        read_only: bool,
        args: &str,
    ) -> Result<Mailbox, select_folder::Error> {
        let command = if read_only { "EXAMINE" } else { "SELECT" };
        self.log.push(format!("{command} {folder}{args}"));
        if self.fail_select {
            return Err(select_folder::Error::NoFolder(
                folder.to_string(),
                "Mailbox doesn't exist".to_string(),
            ));
        }
        Ok(self.mailbox())
    }
}

/// Parses a sequence set without `*`.
fn parse_uid_set(set: &str) -> BTreeSet<u32> {
    let mut uids = BTreeSet::new();
    for range in set.split(',').filter(|range| !range.is_empty()) {
        match range.split_once(':') {
            Some((low, high)) => {
                let low: u32 = low.parse().unwrap();
                let high: u32 = high.parse().unwrap();
                uids.extend(low..=high);
            }
            None => {
                uids.insert(range.parse().unwrap());
            }
        }
    }
    uids
}

impl ImapSession for FakeSession {
    fn can_qresync(&self) -> bool {
        self.qresync
    }

    async fn select_folder(
        &mut self,
        folder: &str,
        read_only: bool,
    ) -> Result<Mailbox, select_folder::Error> {
        self.select_command(folder, read_only, "")
    }

    async fn resync_folder(
        &mut self,
        folder: &str,
        read_only: bool,
        known: &KnownState,
    ) -> Result<ResyncResponse, select_folder::Error> {
        let args = format!(
            " (QRESYNC ({} {} {}))",
            known.uid_validity, known.modseq, known.known_uids
        );
        let mailbox = self.select_command(folder, read_only, &args)?;
        if known.uid_validity != self.uid_validity {
            return Ok(ResyncResponse {
                mailbox,
                ..Default::default()
            });
        }

        let known_uids = parse_uid_set(&known.known_uids);
        let vanished = self
            .expunged
            .iter()
            .filter(|(uid, modseq)| *modseq > known.modseq && known_uids.contains(uid))
            .map(|(uid, _)| *uid)
            .collect();
        let changed = self
            .messages
            .iter()
            .filter(|(uid, message)| message.modseq > known.modseq && known_uids.contains(*uid))
            .map(|(uid, message)| FlagChange {
                uid: *uid,
                flags: message.flags.clone(),
                modseq: Some(message.modseq),
            })
            .collect();
        Ok(ResyncResponse {
            mailbox,
            vanished,
            changed,
        })
    }

    async fn status_uid_next(&mut self, folder: &str) -> Result<Option<u32>> {
        self.log.push(format!("STATUS {folder} (UIDNEXT)"));
        Ok(Some(self.uid_next))
    }

    async fn uid_search(&mut self, criteria: &[SearchCriterion]) -> Result<Vec<u32>> {
        self.log
            .push(format!("UID SEARCH {}", get_imap_search_command(criteria)));
        if self.fail_search {
            bail!("NO [UNAVAILABLE] search failed");
        }
        let mut uids: Vec<u32> = self
            .messages
            .iter()
            .filter(|(uid, message)| {
                criteria.iter().all(|criterion| match criterion {
                    SearchCriterion::NotDraft => !message.flags.contains("\\Draft"),
                    SearchCriterion::Since(date) => message.date >= *date,
                    SearchCriterion::Before(date) => message.date < *date,
                    SearchCriterion::Uid(range) => range.contains(**uid),
                })
            })
            .map(|(uid, _)| *uid)
            .collect();
        uids.extend(&self.extra_search_results);
        Ok(uids)
    }

    async fn fetch_structure(&mut self, uid: u32) -> Result<Option<FetchedStructure>> {
        self.log.push(format!(
            "UID FETCH {uid} (FLAGS MODSEQ BODY.PEEK[HEADER] BODYSTRUCTURE)"
        ));
        if self.fail_structure.contains(&uid) {
            bail!("NO fetch failed");
        }
        let fetched = self.messages.get(&uid).map(|message| FetchedStructure {
            uid,
            flags: message.flags.clone(),
            modseq: self.condstore.then_some(message.modseq),
            headers: vec![("Date".to_string(), message.date.to_string())],
            structure: message.structure.clone(),
        });

        if let Some(expunged) = self.expunge_on_fetch.remove(&uid) {
            self.expunge(expunged);
            self.unsolicited.push(Notification::Vanished {
                uids: vec![expunged],
                earlier: false,
            });
        }
        Ok(fetched)
    }

    async fn fetch_body_parts(
        &mut self,
        uid: u32,
        part_ids: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let sections: Vec<String> = part_ids
            .iter()
            .map(|part_id| format!("BODY.PEEK[{part_id}]"))
            .collect();
        self.log
            .push(format!("UID FETCH {uid} ({})", sections.join(" ")));
        if self.fail_body.contains(&uid) {
            bail!("NO fetch failed");
        }
        let Some(message) = self.messages.get(&uid) else {
            return Ok(BTreeMap::new());
        };
        Ok(part_ids
            .iter()
            .filter_map(|part_id| {
                message
                    .parts
                    .get(part_id)
                    .map(|body| (part_id.clone(), body.clone()))
            })
            .collect())
    }

    fn drain_unsolicited(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.unsolicited)
    }

    async fn idle(&mut self) -> Result<Vec<Notification>> {
        self.log.push("IDLE".to_string());
        match self.idle_responses.pop_front() {
            Some(notifications) => Ok(notifications),
            None => std::future::pending().await,
        }
    }
}
