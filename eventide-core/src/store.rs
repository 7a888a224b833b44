//! Persistence boundary.
//!
//! [`EventStore`] is the contract every storage backend satisfies: an atomic
//! append that assigns store-wide global versions, and a forward-only
//! [`EventIterator`] per aggregate stream. [`validate`] is the write-side
//! consistency check every backend runs inside its critical section, against
//! its own last persisted version, before applying any change.
//!
//! A backend that cannot cheaply supply the prior version of a stream (an
//! external append-only log, say) must not skip [`validate`]; it runs in a
//! degraded mode and documents that fact, it never relaxes the contract.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{concurrency::ConcurrencyConflict, event::Version};

pub mod inmemory;

/// Raw event record crossing the store boundary.
///
/// Payload and metadata are opaque codec output. `global_version` is `0` on
/// the way in and set by the store on commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: Version,
    pub global_version: Version,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// A batch that breaks the write-side contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("multiple aggregates in one batch: expected `{expected}`, found `{found}`")]
    MultipleAggregates { expected: String, found: String },
    #[error("multiple aggregate types in one batch: expected `{expected}`, found `{found}`")]
    MultipleAggregateTypes { expected: String, found: String },
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyConflict),
    #[error("reason missing on event at index {index}")]
    ReasonMissing { index: usize },
}

impl ValidationError {
    /// Whether reloading and retrying can succeed. Only concurrency conflicts
    /// are retryable; everything else is a caller bug.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }
}

/// Check a batch against the last persisted version of its stream.
///
/// Events must all belong to `aggregate_id`, share the first event's type,
/// carry versions exactly `current_version + 1, + 2, …` and have a non-empty
/// reason. The first offending event decides the error.
///
/// # Errors
///
/// Returns the [`ValidationError`] for the first event that breaks a rule.
pub fn validate(
    aggregate_id: &str,
    current_version: Version,
    events: &[StoredEvent],
) -> Result<(), ValidationError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    for (index, event) in events.iter().enumerate() {
        if event.aggregate_id != aggregate_id {
            return Err(ValidationError::MultipleAggregates {
                expected: aggregate_id.to_string(),
                found: event.aggregate_id.clone(),
            });
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(ValidationError::MultipleAggregateTypes {
                expected: first.aggregate_type.clone(),
                found: event.aggregate_type.clone(),
            });
        }
        let expected = current_version + index as Version + 1;
        if event.version != expected {
            return Err(ConcurrencyConflict::new(expected, event.version).into());
        }
        if event.reason.is_empty() {
            return Err(ValidationError::ReasonMissing { index });
        }
    }
    Ok(())
}

/// Error from [`EventStore::save`].
#[derive(Debug, Error)]
pub enum SaveError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error("invalid batch: {0}")]
    Validation(#[from] ValidationError),
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Error from [`EventStore::get`].
#[derive(Debug, Error)]
pub enum GetError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// The stream has no persisted events at all.
    #[error("no events for aggregate")]
    NoEvents,
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Abstraction over the persistence layer for event streams.
// ANCHOR: event_store_trait
pub trait EventStore: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read cursor returned by [`EventStore::get`].
    type Iter: EventIterator<Error = Self::Error>;

    /// Durably append a batch for one aggregate stream.
    ///
    /// An empty batch is a no-op. The backend validates the batch against its
    /// true last persisted version and assigns global versions inside one
    /// critical section, writing the assigned values back into `events`.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Validation`] when the batch breaks the contract;
    /// nothing is persisted in that case.
    fn save<'a>(
        &'a self,
        events: &'a mut [StoredEvent],
    ) -> impl Future<Output = Result<(), SaveError<Self::Error>>> + Send + 'a;

    /// Open a cursor over the events of a stream with `version >
    /// after_version`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`GetError::NoEvents`] when the stream has never been written.
    fn get<'a>(
        &'a self,
        aggregate_id: &'a str,
        aggregate_type: &'a str,
        after_version: Version,
    ) -> impl Future<Output = Result<Self::Iter, GetError<Self::Error>>> + Send + 'a;

    /// Store-wide feed: up to `limit` events with `global_version >
    /// after_global_version`, ordered by global version.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn global_events(
        &self,
        after_global_version: Version,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, Self::Error>> + Send + '_;
}
// ANCHOR_END: event_store_trait

/// Single-pass, forward-only read cursor over one stream.
///
/// Returns `Ok(None)` once exhausted and keeps returning it. Dropping the
/// cursor releases its resources as [`close`](Self::close) does.
pub trait EventIterator: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Advance the cursor. `Ok(None)` is the normal exhaustion signal.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when reading fails.
    fn next(&mut self) -> impl Future<Output = Result<Option<StoredEvent>, Self::Error>> + Send + '_;

    /// Release backend resources. Safe to call more than once and after an
    /// error.
    fn close(&mut self);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StreamKey {
    aggregate_type: String,
    aggregate_id: String,
}

impl StreamKey {
    pub(crate) fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }
}
