//! # UID ranges.

use std::fmt;

use super::Error;

/// Default maximum number of UIDs covered by one batch.
pub const MAX_UIDS_TO_CONSIDER: u32 = 256;

/// Inclusive range of UIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidRange {
    pub low: u32,
    pub high: u32,
    // If low == high, then this range represents a single number
}

impl UidRange {
    /// Creates a range, failing if `low` is greater than `high`.
    pub fn new(low: u32, high: u32) -> Result<Self, Error> {
        if low > high {
            return Err(Error::InvalidUidRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// Number of UIDs in the range.
    pub fn len(&self) -> u64 {
        u64::from(self.high) - u64::from(self.low) + 1
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.low <= uid && uid <= self.high
    }

    /// Returns the smallest range covering both ranges.
    pub fn union(self, other: UidRange) -> UidRange {
        UidRange {
            low: self.low.min(other.low),
            high: self.high.max(other.high),
        }
    }

    /// Splits off the first batch of at most `max_uids` UIDs.
    ///
    /// Returns the batch and the rest of the range, `None` if the batch
    /// reaches `high`.
    pub fn next_batch(self, max_uids: u32) -> (UidRange, Option<UidRange>) {
        let max_uids = max_uids.max(1);
        let batch_high = self.low.saturating_add(max_uids - 1).min(self.high);
        let batch = UidRange {
            low: self.low,
            high: batch_high,
        };
        let remaining = if batch_high < self.high {
            Some(UidRange {
                low: batch_high + 1,
                high: self.high,
            })
        } else {
            None
        };
        (batch, remaining)
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}:{}", self.low, self.high)
        }
    }
}
