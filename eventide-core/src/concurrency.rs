//! Optimistic concurrency conflicts.
//!
//! A writer that last observed version `V` must submit a batch starting at
//! `V + 1`. Anything else means the stream moved underneath it (or the batch
//! is out of order) and the write is rejected as a [`ConcurrencyConflict`].

use thiserror::Error;

use crate::event::Version;

/// The submitted version does not immediately follow the stored one.
///
/// Retryable: reload the aggregate, reapply the command and save again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", format_conflict(*.expected, *.actual))]
pub struct ConcurrencyConflict {
    /// The version the store required (last persisted version + position in
    /// the batch).
    pub expected: Version,
    /// The version the offending event carried.
    pub actual: Version,
}

impl ConcurrencyConflict {
    #[must_use]
    pub const fn new(expected: Version, actual: Version) -> Self {
        Self { expected, actual }
    }
}

fn format_conflict(expected: Version, actual: Version) -> String {
    if expected == 1 {
        format!(
            "concurrency conflict: expected new stream starting at version 1, got {actual} \
             (hint: no events are stored under this aggregate type and id, but the batch \
             starts at version {actual}; check the id and type, then reload)"
        )
    } else if actual < expected {
        format!(
            "concurrency conflict: expected version {expected}, got {actual} (hint: another \
             writer appended to this stream; reload and retry)"
        )
    } else {
        format!(
            "concurrency conflict: expected version {expected}, got {actual} (hint: versions \
             must be contiguous; the batch skips ahead of the stream)"
        )
    }
}
