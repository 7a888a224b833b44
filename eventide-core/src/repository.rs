//! Event repository: the orchestration layer over an [`EventStore`].
//!
//! `EventRepository` turns pending aggregate events into stored records via the
//! codec, checks them against the [`Registry`], hands the batch to the store,
//! copies assigned global versions back and publishes the committed batch on
//! the [`EventStream`]. On read it resolves every stored record through the
//! registry and folds it into the aggregate.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::Aggregate,
    codec::{Codec, JsonCodec},
    concurrency::ConcurrencyConflict,
    event::{Event, EventSet, Metadata, PublishedEvent, Version},
    registry::Registry,
    store::{self, EventIterator, EventStore, StoredEvent, ValidationError},
    stream::{EventStream, Filter, Subscription},
};

/// Error returned by [`EventRepository::save`].
#[derive(Debug, Error)]
pub enum SaveError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    #[error("aggregate type `{aggregate_type}` is not registered")]
    UnregisteredAggregate { aggregate_type: &'static str },
    #[error("event `{reason}` is not registered for aggregate type `{aggregate_type}`")]
    UnregisteredEvent {
        aggregate_type: &'static str,
        reason: &'static str,
    },
    #[error(
        "event `{reason}` of aggregate type `{aggregate_type}` is registered for a different payload type"
    )]
    MismatchedEvent {
        aggregate_type: &'static str,
        reason: &'static str,
    },
    #[error("failed to encode event: {0}")]
    Codec(#[source] CodecError),
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyConflict),
    #[error("malformed batch: {0}")]
    InvalidBatch(#[source] ValidationError),
    #[error("failed to persist events: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError, CodecError> SaveError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    /// Whether another writer got there first. Reload and retry.
    #[must_use]
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }
}

/// Error returned by [`EventRepository::get`] and the global feed.
#[derive(Debug, Error)]
pub enum GetError<StoreError, CodecError>
where
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    /// No persisted events for this aggregate identity.
    #[error("aggregate not found")]
    NotFound,
    #[error("replay cancelled")]
    Cancelled,
    #[error("failed to decode event: {0}")]
    Codec(#[source] CodecError),
    /// A registered factory produced a payload the aggregate's event set does
    /// not contain.
    #[error("event `{reason}` does not belong to aggregate type `{aggregate_type}`")]
    PayloadMismatch {
        aggregate_type: String,
        reason: String,
    },
    #[error("failed to load events: {0}")]
    Store(#[source] StoreError),
}

/// Result alias for [`EventRepository::save`].
pub type SaveResult<S, C> = Result<(), SaveError<<S as EventStore>::Error, <C as Codec>::Error>>;

/// Result alias for [`EventRepository::get`].
pub type GetResult<S, C, T = ()> =
    Result<T, GetError<<S as EventStore>::Error, <C as Codec>::Error>>;

/// Repository over an event store.
pub struct EventRepository<S, C = JsonCodec>
where
    S: EventStore,
    C: Codec,
{
    pub(crate) store: S,
    codec: C,
    registry: Arc<Registry<C>>,
    stream: Arc<EventStream>,
}

impl<S> EventRepository<S>
where
    S: EventStore,
{
    /// Repository using [`JsonCodec`], an empty registry and a private event
    /// stream.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            codec: JsonCodec,
            registry: Arc::new(Registry::new()),
            stream: Arc::new(EventStream::new()),
        }
    }
}

impl<S, C> EventRepository<S, C>
where
    S: EventStore,
    C: Codec,
{
    /// Swap the codec. The registry is tied to the codec, so this starts a
    /// fresh one; register aggregates afterwards.
    #[must_use]
    pub fn with_codec<C2: Codec>(self, codec: C2) -> EventRepository<S, C2> {
        EventRepository {
            store: self.store,
            codec,
            registry: Arc::new(Registry::new()),
            stream: self.stream,
        }
    }

    /// Share an event stream with other repositories.
    #[must_use]
    pub fn with_event_stream(mut self, stream: Arc<EventStream>) -> Self {
        self.stream = stream;
        self
    }

    /// Share a registry with other repositories.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<Registry<C>>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub const fn event_store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry<C>> {
        &self.registry
    }

    #[must_use]
    pub fn event_stream(&self) -> &Arc<EventStream> {
        &self.stream
    }

    /// Declare an aggregate type and its payloads. Required before saving.
    pub fn register<A: Aggregate>(&self) {
        self.registry.register::<A>();
    }

    /// Subscribe to events committed through this repository's stream.
    pub fn subscribe<F>(&self, filter: Filter, callback: F) -> Subscription
    where
        F: Fn(&PublishedEvent) + Send + Sync + 'static,
    {
        self.stream.subscribe(filter, callback)
    }

    /// Commit the aggregate's pending events.
    ///
    /// On success the pending buffer is empty, the aggregate's versions match
    /// the last committed event and subscribers have seen the batch. On failure
    /// nothing is persisted and the aggregate is untouched.
    ///
    /// # Errors
    ///
    /// - [`SaveError::UnregisteredAggregate`] / [`SaveError::UnregisteredEvent`]
    ///   when types were not declared
    /// - [`SaveError::MismatchedEvent`] when a reason is registered for another
    ///   payload type
    /// - [`SaveError::Concurrency`] when the stream moved since the aggregate
    ///   was loaded
    /// - [`SaveError::InvalidBatch`], [`SaveError::Codec`], [`SaveError::Store`]
    #[tracing::instrument(
        skip(self, aggregate),
        fields(aggregate_type = A::TYPE, aggregate_id = aggregate.id(), events = aggregate.pending_events().len())
    )]
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> SaveResult<S, C> {
        if !self.registry.is_registered(A::TYPE) {
            return Err(SaveError::UnregisteredAggregate {
                aggregate_type: A::TYPE,
            });
        }
        if !aggregate.has_pending_events() {
            tracing::trace!("nothing to save");
            return Ok(());
        }

        let mut records = self.encode_pending(A::TYPE, aggregate.pending_events())?;
        self.store
            .save(&mut records)
            .await
            .map_err(|err| match err {
                store::SaveError::Validation(ValidationError::Concurrency(conflict)) => {
                    SaveError::Concurrency(conflict)
                }
                store::SaveError::Validation(err) => SaveError::InvalidBatch(err),
                store::SaveError::Store(err) => SaveError::Store(err),
            })?;

        let root = aggregate.root_mut();
        for (event, record) in root.pending_events_mut().iter_mut().zip(&records) {
            event.global_version = record.global_version;
        }
        let published: Vec<_> = root.pending_events().iter().map(Event::to_published).collect();
        self.stream.update(&published);
        root.commit_pending();

        tracing::debug!(
            version = aggregate.version(),
            global_version = aggregate.global_version(),
            "aggregate saved"
        );
        Ok(())
    }

    fn encode_pending<E: EventSet>(
        &self,
        aggregate_type: &'static str,
        pending: &[Event<E>],
    ) -> Result<Vec<StoredEvent>, SaveError<S::Error, C::Error>> {
        let mut records = Vec::with_capacity(pending.len());
        for event in pending {
            let reason = event.reason();
            match self.registry.payload_type(aggregate_type, reason) {
                None => {
                    return Err(SaveError::UnregisteredEvent {
                        aggregate_type,
                        reason,
                    });
                }
                Some(registered) if registered != event.data.payload_type() => {
                    return Err(SaveError::MismatchedEvent {
                        aggregate_type,
                        reason,
                    });
                }
                Some(_) => {}
            }
            tracing::trace!(version = event.version, reason, "encoding event");
            records.push(StoredEvent {
                aggregate_id: event.aggregate_id.clone(),
                aggregate_type: event.aggregate_type.clone(),
                version: event.version,
                global_version: 0,
                reason: reason.to_string(),
                timestamp: event.timestamp,
                data: event.data.encode(&self.codec).map_err(SaveError::Codec)?,
                metadata: self
                    .codec
                    .serialize(&event.metadata)
                    .map_err(SaveError::Codec)?,
            });
        }
        Ok(records)
    }

    /// Replay events committed after the aggregate's persisted version.
    ///
    /// Works on a fresh aggregate (full replay) and on one seeded from a
    /// snapshot (delta replay). Events of unregistered types are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GetError::NotFound`] when no event was ever folded into the
    /// aggregate.
    pub async fn get<A: Aggregate>(&self, id: &str, aggregate: &mut A) -> GetResult<S, C> {
        self.get_with_cancellation(&CancellationToken::new(), id, aggregate)
            .await
    }

    /// [`get`](Self::get), checking `token` before every cursor advance.
    ///
    /// # Errors
    ///
    /// Returns [`GetError::Cancelled`] as soon as the token is observed
    /// cancelled; events folded so far stay applied.
    #[tracing::instrument(skip(self, token, aggregate), fields(aggregate_type = A::TYPE))]
    pub async fn get_with_cancellation<A: Aggregate>(
        &self,
        token: &CancellationToken,
        id: &str,
        aggregate: &mut A,
    ) -> GetResult<S, C> {
        let after = aggregate.root().persisted_version();
        let mut iter = match self.store.get(id, A::TYPE, after).await {
            Ok(iter) => iter,
            Err(store::GetError::NoEvents) => return Err(GetError::NotFound),
            Err(store::GetError::Store(err)) => return Err(GetError::Store(err)),
        };

        let result = self.fold_stream(token, &mut iter, aggregate).await;
        iter.close();
        let folded = result?;

        if aggregate.root().persisted_version() == 0 {
            return Err(GetError::NotFound);
        }
        tracing::debug!(after, folded, version = aggregate.version(), "aggregate loaded");
        Ok(())
    }

    /// Load a fresh aggregate by full replay.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn load<A: Aggregate + Default>(&self, id: &str) -> GetResult<S, C, A> {
        let mut aggregate = A::default();
        self.get(id, &mut aggregate).await?;
        Ok(aggregate)
    }

    async fn fold_stream<A: Aggregate>(
        &self,
        token: &CancellationToken,
        iter: &mut S::Iter,
        aggregate: &mut A,
    ) -> GetResult<S, C, usize> {
        let mut folded = 0;
        loop {
            if token.is_cancelled() {
                tracing::debug!(folded, "replay cancelled");
                return Err(GetError::Cancelled);
            }
            let Some(record) = iter.next().await.map_err(GetError::Store)? else {
                return Ok(folded);
            };
            let Some(event) = self.decode(record)? else {
                continue;
            };
            let event = event.try_map_data(A::Event::from_payload).map_err(|payload| {
                GetError::PayloadMismatch {
                    aggregate_type: A::TYPE.to_string(),
                    reason: payload.reason().to_string(),
                }
            })?;
            aggregate.build_from_history(std::iter::once(event));
            folded += 1;
        }
    }

    /// Resolve a stored record through the registry. `None` if its type is
    /// unknown here.
    fn decode(&self, record: StoredEvent) -> GetResult<S, C, Option<PublishedEvent>> {
        let Some(factory) = self
            .registry
            .factory(&record.aggregate_type, &record.reason)
        else {
            tracing::trace!(
                aggregate_type = %record.aggregate_type,
                reason = %record.reason,
                version = record.version,
                "skipping unregistered event"
            );
            return Ok(None);
        };
        let data = factory(&self.codec, &record.data).map_err(GetError::Codec)?;
        let metadata = if record.metadata.is_empty() {
            Metadata::new()
        } else {
            self.codec
                .deserialize(&record.metadata)
                .map_err(GetError::Codec)?
        };
        Ok(Some(Event {
            aggregate_id: record.aggregate_id,
            aggregate_type: record.aggregate_type,
            version: record.version,
            global_version: record.global_version,
            timestamp: record.timestamp,
            data,
            metadata,
        }))
    }

    /// Store-wide feed of committed events after `after_global_version`, in
    /// global order. Events of unregistered types are skipped, so fewer than
    /// `limit` events may come back even when more exist.
    ///
    /// # Errors
    ///
    /// Returns [`GetError::Store`] or [`GetError::Codec`].
    #[tracing::instrument(skip(self))]
    pub async fn global_events(
        &self,
        after_global_version: Version,
        limit: usize,
    ) -> GetResult<S, C, Vec<PublishedEvent>> {
        let records = self
            .store
            .global_events(after_global_version, limit)
            .await
            .map_err(GetError::Store)?;
        let mut events = Vec::with_capacity(records.len());
        for record in records {
            if let Some(event) = self.decode(record)? {
                events.push(event);
            }
        }
        tracing::debug!(events = events.len(), "global events loaded");
        Ok(events)
    }
}
