//! Domain events and their envelope.
//!
//! [`DomainEvent`] is the lightweight trait every concrete payload struct
//! implements. An aggregate groups its payloads into one sum type implementing
//! [`EventSet`], and every payload travels inside an [`Event`] envelope that
//! carries identity, versions, timestamp and metadata.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{codec::Codec, registry::Registrar};

/// Per-stream or store-wide sequence number. `0` means "nothing yet".
pub type Version = u64;

/// Free-form key/value metadata attached to an event. Never interpreted by the
/// core.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Marker trait for concrete event payloads.
///
/// Each payload carries a unique [`Self::REASON`] tag so the registry can route
/// stored bytes back to the correct type when rebuilding aggregates.
///
/// Most projects use `#[derive(DomainEvent)]`, which defaults the reason to the
/// kebab-case type name.
pub trait DomainEvent:
    fmt::Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const REASON: &'static str;
}

/// Whether no reason appears twice in `reasons`.
///
/// `#[derive(Aggregate)]` evaluates this in a `const` item, so two payloads
/// sharing a reason fail to compile.
#[must_use]
pub const fn reasons_are_unique(reasons: &[&str]) -> bool {
    let mut i = 0;
    while i < reasons.len() {
        let mut j = i + 1;
        while j < reasons.len() {
            if str_eq(reasons[i], reasons[j]) {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const fn str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// Sum of the payload types an aggregate can produce.
///
/// `#[derive(Aggregate)]` generates the enum and this implementation. For
/// hand-written sets, each method is a `match` over the variants.
pub trait EventSet: fmt::Debug + Clone + Send + Sync + Sized + 'static {
    /// Reason tag of the payload held by this variant.
    fn reason(&self) -> &'static str;

    /// Serialise the inner payload (not the enum) with `codec`.
    ///
    /// # Errors
    ///
    /// Returns the codec error when the payload cannot be serialised.
    fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error>;

    /// Type-erased copy of the inner payload.
    fn to_payload(&self) -> Payload;

    /// Recover the variant from a type-erased payload.
    ///
    /// # Errors
    ///
    /// Hands the payload back when its concrete type is not part of this set.
    fn from_payload(payload: Payload) -> Result<Self, Payload>;

    /// Declare every payload type in the set.
    fn register<C: Codec>(registrar: &mut Registrar<'_, Self, C>);

    /// [`TypeId`] of the inner payload.
    fn payload_type(&self) -> TypeId {
        self.to_payload().payload_type()
    }
}

/// One recorded state change of an aggregate.
///
/// `global_version` is `0` until the store commits the event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event<E> {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: Version,
    pub global_version: Version,
    pub timestamp: DateTime<Utc>,
    pub data: E,
    pub metadata: Metadata,
}

impl<E> Event<E> {
    /// Replace the payload through a fallible conversion, keeping the envelope.
    ///
    /// # Errors
    ///
    /// Returns the conversion error unchanged.
    pub fn try_map_data<T, Err>(self, f: impl FnOnce(E) -> Result<T, Err>) -> Result<Event<T>, Err> {
        Ok(Event {
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            version: self.version,
            global_version: self.global_version,
            timestamp: self.timestamp,
            data: f(self.data)?,
            metadata: self.metadata,
        })
    }
}

impl<E: EventSet> Event<E> {
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.data.reason()
    }

    /// Copy of this event with a type-erased payload, as seen by subscribers.
    #[must_use]
    pub fn to_published(&self) -> Event<Payload> {
        Event {
            aggregate_id: self.aggregate_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            version: self.version,
            global_version: self.global_version,
            timestamp: self.timestamp,
            data: self.data.to_payload(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Event as delivered to subscribers and returned by the global feed.
pub type PublishedEvent = Event<Payload>;

/// Type-erased, cheaply clonable event payload.
#[derive(Clone)]
pub struct Payload {
    reason: &'static str,
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    pub fn new<T: DomainEvent>(value: T) -> Self {
        Self {
            reason: T::REASON,
            type_id: TypeId::of::<T>(),
            value: Arc::new(value),
        }
    }

    #[must_use]
    pub const fn reason(&self) -> &'static str {
        self.reason
    }

    /// [`TypeId`] of the concrete payload.
    #[must_use]
    pub const fn payload_type(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn is<T: DomainEvent>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    #[must_use]
    pub fn downcast_ref<T: DomainEvent>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the concrete payload out, cloning only if the payload is shared.
    ///
    /// # Errors
    ///
    /// Hands the payload back unchanged when it does not hold a `T`.
    pub fn downcast<T: DomainEvent>(self) -> Result<T, Self> {
        let Self {
            reason,
            type_id,
            value,
        } = self;
        match value.downcast::<T>() {
            Ok(value) => Ok(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())),
            Err(value) => Err(Self {
                reason,
                type_id,
                value,
            }),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}
