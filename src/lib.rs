#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use eventide_core::test;
pub use eventide_core::{
    aggregate,
    aggregate::{Aggregate, AggregateError, AggregateRoot, Apply},
    codec,
    codec::{Codec, JsonCodec},
    concurrency,
    concurrency::ConcurrencyConflict,
    event,
    event::{DomainEvent, Event, EventSet, Metadata, Payload, PublishedEvent, Version},
    identity,
    identity::IdGenerator,
    registry,
    registry::Registry,
    repository,
    repository::EventRepository,
    snapshot,
    snapshot::{SnapshotPolicy, SnapshotRepository},
    store,
    store::{EventIterator, EventStore, StoredEvent},
    stream,
    stream::{EventStream, Filter, Subscription},
};
// Re-export proc macro derives so consumers only depend on `eventide`.
pub use eventide_macros::{Aggregate, DomainEvent};
