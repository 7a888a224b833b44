//! Aggregate state tracking.
//!
//! An aggregate is a plain struct that embeds an [`AggregateRoot`] and
//! implements [`Aggregate`]. Domain behaviours call
//! [`Aggregate::track_change`], which buffers a pending event and applies it to
//! in-memory state immediately. Replays fold stored events through the same
//! transition function via [`Aggregate::build_from_history`].
//!
//! The `#[derive(Aggregate)]` macro generates the event enum and dispatches
//! transitions to [`Apply<E>`] implementations.

use chrono::Utc;
use thiserror::Error;

use crate::{
    codec::Codec,
    event::{Event, EventSet, Metadata, Version},
    identity::IdGenerator,
    registry::Registrar,
};

/// Errors raised by the aggregate protocol itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    /// The aggregate already carries an identity.
    #[error("aggregate id already set to `{current}`")]
    IdAlreadySet { current: String },
}

/// Bookkeeping shared by every aggregate: identity, committed versions and the
/// buffer of pending (uncommitted) events.
///
/// Embed it in the aggregate struct and mark it `#[serde(skip)]` when the
/// aggregate is snapshotted; snapshots carry these fields in their header.
#[derive(Clone, Debug)]
pub struct AggregateRoot<E> {
    id: String,
    version: Version,
    global_version: Version,
    pending: Vec<Event<E>>,
    id_generator: IdGenerator,
}

impl<E> Default for AggregateRoot<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> AggregateRoot<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: String::new(),
            version: 0,
            global_version: 0,
            pending: Vec::new(),
            id_generator: IdGenerator::default(),
        }
    }

    /// Root that draws identities from `generator` instead of the random
    /// default.
    #[must_use]
    pub fn with_id_generator(generator: IdGenerator) -> Self {
        Self {
            id_generator: generator,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Persisted version of the last committed event.
    #[must_use]
    pub const fn persisted_version(&self) -> Version {
        self.version
    }

    /// Highest version including pending events.
    #[must_use]
    pub fn version(&self) -> Version {
        self.pending.last().map_or(self.version, |event| event.version)
    }

    /// Global version of the last committed event. Pending events never count.
    #[must_use]
    pub const fn global_version(&self) -> Version {
        self.global_version
    }

    #[must_use]
    pub fn pending_events(&self) -> &[Event<E>] {
        &self.pending
    }

    /// Set the identity explicitly, before any change is tracked.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::IdAlreadySet`] if an identity exists.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<(), AggregateError> {
        if !self.id.is_empty() {
            return Err(AggregateError::IdAlreadySet {
                current: self.id.clone(),
            });
        }
        self.id = id.into();
        Ok(())
    }

    /// Seed identity and versions from a snapshot header.
    pub(crate) fn restore(&mut self, id: String, version: Version, global_version: Version) {
        self.id = id;
        self.version = version;
        self.global_version = global_version;
    }

    pub(crate) fn pending_events_mut(&mut self) -> &mut [Event<E>] {
        &mut self.pending
    }

    /// Fold the counters from the last pending event and clear the buffer.
    pub(crate) fn commit_pending(&mut self) {
        if let Some(last) = self.pending.last() {
            self.version = last.version;
            self.global_version = last.global_version;
        }
        self.pending.clear();
    }

    fn next_event(&mut self, aggregate_type: &str, data: E, metadata: Metadata) -> Event<E> {
        if self.id.is_empty() {
            self.id = self.id_generator.generate();
        }
        Event {
            aggregate_id: self.id.clone(),
            aggregate_type: aggregate_type.to_string(),
            version: self.version() + 1,
            global_version: 0,
            timestamp: Utc::now(),
            data,
            metadata,
        }
    }

    fn fold(&mut self, event: &Event<E>) {
        self.id.clone_from(&event.aggregate_id);
        self.version = event.version;
        self.global_version = event.global_version;
    }
}

/// Command-side entity whose state is derived from its events.
///
/// Implementors embed an [`AggregateRoot`] and expose it through
/// [`root`](Self::root)/[`root_mut`](Self::root_mut). All orchestration goes
/// through this trait.
pub trait Aggregate: Send + Sized {
    /// Aggregate type tag stored on every event. Use lowercase kebab-case:
    /// `"account"`, `"user-profile"`.
    const TYPE: &'static str;

    type Event: EventSet;

    fn root(&self) -> &AggregateRoot<Self::Event>;

    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

    /// Apply one event to the aggregate's domain state.
    ///
    /// Called both when tracking a new change and when replaying history.
    fn transition(&mut self, event: &Event<Self::Event>);

    /// Declare the payload types this aggregate can produce.
    ///
    /// Defaults to every variant of [`Self::Event`].
    fn register_events<C: Codec>(registrar: &mut Registrar<'_, Self::Event, C>) {
        <Self::Event as EventSet>::register(registrar);
    }

    fn id(&self) -> &str {
        self.root().id()
    }

    /// Highest version including pending events.
    fn version(&self) -> Version {
        self.root().version()
    }

    /// Global version of the last committed event.
    fn global_version(&self) -> Version {
        self.root().global_version()
    }

    fn pending_events(&self) -> &[Event<Self::Event>] {
        self.root().pending_events()
    }

    fn has_pending_events(&self) -> bool {
        !self.root().pending_events().is_empty()
    }

    /// See [`AggregateRoot::set_id`].
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::IdAlreadySet`] if an identity exists.
    fn set_id(&mut self, id: impl Into<String>) -> Result<(), AggregateError> {
        self.root_mut().set_id(id)
    }

    /// Record a new change and apply it to in-memory state.
    fn track_change(&mut self, data: impl Into<Self::Event>) {
        self.track_change_with_metadata(data, Metadata::new());
    }

    /// Record a new change carrying metadata and apply it to in-memory state.
    fn track_change_with_metadata(&mut self, data: impl Into<Self::Event>, metadata: Metadata) {
        let event = self.root_mut().next_event(Self::TYPE, data.into(), metadata);
        self.root_mut().pending.push(event.clone());
        self.transition(&event);
    }

    /// Fold historical events in order, advancing identity and versions with
    /// each one.
    fn build_from_history<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = Event<Self::Event>>,
    {
        for event in events {
            self.transition(&event);
            self.root_mut().fold(&event);
        }
    }
}

/// Apply one payload type to aggregate state.
///
/// `#[derive(Aggregate)]` dispatches [`Aggregate::transition`] to these
/// implementations.
///
/// ```ignore
/// impl Apply<FundsDeposited> for Account {
///     fn apply(&mut self, event: &FundsDeposited) {
///         self.balance += event.amount;
///     }
/// }
/// ```
pub trait Apply<E> {
    fn apply(&mut self, event: &E);
}
