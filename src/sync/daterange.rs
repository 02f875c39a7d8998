//! # Backfill date ranges.
//!
//! The first sync of a folder searches it window by window, starting with
//! the most recent messages. Windows are half months: the 1st to the 15th
//! and the 16th to the end of a month. The newest window is open towards
//! the future, the oldest one towards the past, so the whole folder is
//! covered by a fixed number of searches.

use chrono::{Datelike, NaiveDate};

use crate::imap::SearchCriterion;

/// Default number of windows searched during the first sync.
pub const BACKFILL_WINDOWS: usize = 25;

/// Date window of a backfill search, `from` inclusive, `to` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// Search criteria restricting a search to this window.
    pub fn search_criteria(&self) -> Vec<SearchCriterion> {
        let mut criteria = Vec::with_capacity(2);
        if let Some(from) = self.from {
            criteria.push(SearchCriterion::Since(from));
        }
        if let Some(to) = self.to {
            criteria.push(SearchCriterion::Before(to));
        }
        criteria
    }
}

/// Plans `windows` backfill windows ending at `reference`.
///
/// The result is ordered oldest first, so that popping from the end
/// yields the newest window first.
pub fn plan_date_ranges(reference: NaiveDate, windows: usize) -> Vec<DateRange> {
    if windows == 0 {
        return Vec::new();
    }

    // Window starts, newest first. `windows` windows need `windows - 1` of them.
    let mut starts = Vec::with_capacity(windows - 1);
    let mut next = Some(window_start(reference));
    while starts.len() + 1 < windows {
        let Some(start) = next else {
            break;
        };
        starts.push(start);
        next = previous_window_start(start);
    }

    let mut ranges = Vec::with_capacity(windows);
    let mut to = None;
    for start in starts {
        ranges.push(DateRange {
            from: Some(start),
            to,
        });
        to = Some(start);
    }
    ranges.push(DateRange { from: None, to });
    ranges.reverse();
    ranges
}

/// Start of the half-month window containing `date`.
fn window_start(date: NaiveDate) -> NaiveDate {
    let day = if date.day() >= 16 { 16 } else { 1 };
    date.with_day(day).unwrap_or(date)
}

/// Start of the window preceding the window starting at `start`.
fn previous_window_start(start: NaiveDate) -> Option<NaiveDate> {
    if start.day() > 1 {
        start.with_day(1)
    } else {
        start.pred_opt()?.with_day(16)
    }
}
