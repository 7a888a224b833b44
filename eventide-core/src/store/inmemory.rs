//! In-memory event store for tests and examples.
//!
//! [`Store`] keeps one global log of committed events plus a per-stream index
//! into it. Validation and global version assignment both run under the same
//! write guard, so concurrent saves are serialised store-wide.
//!
//! ```
//! use eventide_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! # let _ = store;
//! ```

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{Arc, RwLock},
};

use crate::{
    event::Version,
    store::{EventIterator, EventStore, GetError, SaveError, StoredEvent, StreamKey, validate},
};

/// Thread-safe in-memory event store. Clones share the same state.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Every committed event; the event at index `i` has global version `i + 1`.
    log: Vec<StoredEvent>,
    /// Indices into `log`, ascending by local version.
    streams: HashMap<StreamKey, Vec<usize>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events committed across all streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("in-memory store lock poisoned").log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Error type for the in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// [`EventIterator::next`] was called after [`EventIterator::close`].
    #[error("iterator used after close")]
    Closed,
}

impl EventStore for Store {
    type Error = Error;
    type Iter = Iter;

    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    fn save<'a>(
        &'a self,
        events: &'a mut [StoredEvent],
    ) -> impl Future<Output = Result<(), SaveError<Self::Error>>> + Send + 'a {
        let result = (|| {
            let Some(first) = events.first() else {
                return Ok(());
            };
            let key = StreamKey::new(first.aggregate_type.clone(), first.aggregate_id.clone());
            let aggregate_id = first.aggregate_id.clone();

            let mut inner = self.inner.write().expect("in-memory store lock poisoned");
            let current = inner.streams.get(&key).map_or(0, Vec::len) as Version;
            if let Err(err) = validate(&aggregate_id, current, events) {
                tracing::debug!(%err, current, "rejecting batch");
                return Err(SaveError::Validation(err));
            }

            let mut indices = Vec::with_capacity(events.len());
            for event in events.iter_mut() {
                let index = inner.log.len();
                event.global_version = index as Version + 1;
                inner.log.push(event.clone());
                indices.push(index);
            }
            inner.streams.entry(key).or_default().extend(indices);
            let last_global = inner.log.len();
            drop(inner);

            tracing::debug!(last_global, "events committed to stream");
            Ok(())
        })();

        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn get<'a>(
        &'a self,
        aggregate_id: &'a str,
        aggregate_type: &'a str,
        after_version: Version,
    ) -> impl Future<Output = Result<Self::Iter, GetError<Self::Error>>> + Send + 'a {
        let key = StreamKey::new(aggregate_type, aggregate_id);
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        let result = match inner.streams.get(&key) {
            None => Err(GetError::NoEvents),
            Some(indices) => {
                let events: VecDeque<_> = indices
                    .iter()
                    .map(|&index| &inner.log[index])
                    .filter(|event| event.version > after_version)
                    .cloned()
                    .collect();
                tracing::trace!(events = events.len(), "opened stream cursor");
                Ok(Iter::new(events))
            }
        };
        drop(inner);
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self))]
    fn global_events(
        &self,
        after_global_version: Version,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, Self::Error>> + Send + '_ {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        let start = usize::try_from(after_global_version)
            .unwrap_or(usize::MAX)
            .min(inner.log.len());
        let events: Vec<_> = inner.log[start..].iter().take(limit).cloned().collect();
        drop(inner);
        tracing::trace!(events = events.len(), "loaded global events");
        std::future::ready(Ok(events))
    }
}

/// Cursor over a snapshot of one stream taken when it was opened.
#[derive(Debug)]
pub struct Iter {
    events: VecDeque<StoredEvent>,
    closed: bool,
}

impl Iter {
    const fn new(events: VecDeque<StoredEvent>) -> Self {
        Self {
            events,
            closed: false,
        }
    }
}

impl EventIterator for Iter {
    type Error = Error;

    fn next(&mut self) -> impl Future<Output = Result<Option<StoredEvent>, Self::Error>> + Send + '_ {
        let result = if self.closed {
            Err(Error::Closed)
        } else {
            Ok(self.events.pop_front())
        };
        std::future::ready(result)
    }

    fn close(&mut self) {
        self.closed = true;
        self.events.clear();
    }
}
