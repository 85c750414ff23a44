//! Optimistic concurrency expectations for versioned rows.

use crate::error::{LedgerError, LedgerResult};

/// Version a writer observed when it read the row it is about to replace.
///
/// Stores compare this against the row they hold at commit time and reject the
/// write with a conflict when they differ (compare-and-swap).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The row must not exist yet (insert).
    Absent,
    /// The row must exist at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation matching a row read as `current` (`None` when absent).
    pub fn of(current: Option<u64>) -> Self {
        match current {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::Absent,
        }
    }

    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> LedgerResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(LedgerError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}
