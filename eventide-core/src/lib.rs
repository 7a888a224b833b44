//! Core traits and types for the eventide event-sourcing library.
//!
//! - [`aggregate`] - State tracking for event-sourced entities (`Aggregate`,
//!   `AggregateRoot`, `Apply`)
//! - [`event`] - Payload traits and the event envelope (`DomainEvent`,
//!   `EventSet`, `Event`, `Payload`)
//! - [`registry`] - Explicit `(aggregate type, reason)` type registry
//! - [`store`] - Persistence contract (`EventStore`, `EventIterator`,
//!   `validate`)
//! - [`repository`] - Save/get orchestration (`EventRepository`)
//! - [`snapshot`] - Snapshot-assisted replay (`SnapshotRepository`)
//! - [`stream`] - Synchronous pub/sub for committed events (`EventStream`)
//! - [`codec`], [`identity`], [`concurrency`] - Pluggable serialisation,
//!   identity generation and the conflict error
//!
//! # Example
//!
//! ```
//! use eventide_core::{repository::EventRepository, store::inmemory};
//!
//! let repository = EventRepository::new(inmemory::Store::new());
//! # let _ = repository;
//! ```
//!
//! Most users should depend on the `eventide` crate, which re-exports these
//! types together with the derive macros.

pub mod aggregate;
pub mod codec;
pub mod concurrency;
pub mod event;
pub mod identity;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod stream;
