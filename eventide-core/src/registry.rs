//! Explicit payload type registry.
//!
//! Replays are type-safe because every `(aggregate type, reason)` pair that
//! may appear in a stream is declared up front. The registry maps each pair to
//! a factory that decodes stored bytes into a [`Payload`].
//!
//! - On read, an unknown pair is skipped so that older readers can replay
//!   streams containing newer event types.
//! - On write, an unknown pair refuses the whole batch so that nothing is
//!   committed which could never be decoded again. So does a known pair whose
//!   registered payload type differs from the one being written.
//!
//! A reason names exactly one payload type per aggregate type. Declaring a
//! second type under a taken reason is a programming error and panics at
//! registration.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    marker::PhantomData,
    sync::RwLock,
};

use crate::{
    aggregate::Aggregate,
    codec::Codec,
    event::{DomainEvent, EventSet, Payload},
};

/// Decodes stored bytes into a type-erased payload.
pub type Factory<C> = fn(&C, &[u8]) -> Result<Payload, <C as Codec>::Error>;

struct Entry<C: Codec> {
    type_id: TypeId,
    type_name: &'static str,
    factory: Factory<C>,
}

impl<C: Codec> Clone for Entry<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Codec> Copy for Entry<C> {}

type Reasons<C> = HashMap<&'static str, Entry<C>>;

fn collision(aggregate_type: &str, reason: &str, taken: &str, offered: &str) -> String {
    format!(
        "aggregate `{aggregate_type}` registers reason `{reason}` for both `{taken}` and \
         `{offered}`; give one of them a distinct `#[event(reason = \"...\")]`"
    )
}

fn decode_payload<T, C>(codec: &C, data: &[u8]) -> Result<Payload, C::Error>
where
    T: DomainEvent,
    C: Codec,
{
    codec.deserialize::<T>(data).map(Payload::new)
}

/// Shared registry of aggregate and payload types.
///
/// Safe for concurrent use from many repositories and tasks.
pub struct Registry<C: Codec> {
    types: RwLock<HashMap<&'static str, Reasons<C>>>,
}

impl<C: Codec> Registry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Register an aggregate type and the payload types it declares.
    ///
    /// Registering the same aggregate again is a no-op for already-known
    /// reasons.
    ///
    /// # Panics
    ///
    /// Panics when a reason is already taken by a different payload type for
    /// the same aggregate type. The registry is left unchanged.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::TYPE))]
    pub fn register<A: Aggregate>(&self) {
        let mut declared = Reasons::new();
        let mut registrar = Registrar {
            aggregate_type: A::TYPE,
            reasons: &mut declared,
            _events: PhantomData,
        };
        A::register_events(&mut registrar);

        let mut types = self.types.write().expect("registry lock poisoned");
        let clash = types.get(A::TYPE).and_then(|reasons| {
            declared.iter().find_map(|(reason, entry)| {
                reasons
                    .get(reason)
                    .filter(|taken| taken.type_id != entry.type_id)
                    .map(|taken| collision(A::TYPE, reason, taken.type_name, entry.type_name))
            })
        });
        if let Some(message) = clash {
            drop(types);
            panic!("{message}");
        }
        let reasons = types.entry(A::TYPE).or_default();
        reasons.extend(declared);
        tracing::debug!(reasons = reasons.len(), "aggregate registered");
    }

    #[must_use]
    pub fn is_registered(&self, aggregate_type: &str) -> bool {
        self.types
            .read()
            .expect("registry lock poisoned")
            .contains_key(aggregate_type)
    }

    #[must_use]
    pub fn contains(&self, aggregate_type: &str, reason: &str) -> bool {
        self.entry(aggregate_type, reason).is_some()
    }

    /// Factory for a stored `(aggregate type, reason)` pair, if registered.
    #[must_use]
    pub fn factory(&self, aggregate_type: &str, reason: &str) -> Option<Factory<C>> {
        self.entry(aggregate_type, reason).map(|entry| entry.factory)
    }

    /// Payload type registered for a `(aggregate type, reason)` pair.
    #[must_use]
    pub fn payload_type(&self, aggregate_type: &str, reason: &str) -> Option<TypeId> {
        self.entry(aggregate_type, reason).map(|entry| entry.type_id)
    }

    /// Whether `payload_type` is the type registered under the pair.
    #[must_use]
    pub fn accepts(&self, aggregate_type: &str, reason: &str, payload_type: TypeId) -> bool {
        self.payload_type(aggregate_type, reason) == Some(payload_type)
    }

    fn entry(&self, aggregate_type: &str, reason: &str) -> Option<Entry<C>> {
        self.types
            .read()
            .expect("registry lock poisoned")
            .get(aggregate_type)
            .and_then(|reasons| reasons.get(reason).copied())
    }

    /// Registered reasons for an aggregate type, sorted.
    #[must_use]
    pub fn reasons(&self, aggregate_type: &str) -> Vec<&'static str> {
        let types = self.types.read().expect("registry lock poisoned");
        let mut reasons: Vec<_> = types
            .get(aggregate_type)
            .map(|reasons| reasons.keys().copied().collect())
            .unwrap_or_default();
        reasons.sort_unstable();
        reasons
    }
}

impl<C: Codec> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle passed to [`Aggregate::register_events`].
pub struct Registrar<'a, E, C: Codec> {
    aggregate_type: &'static str,
    reasons: &'a mut Reasons<C>,
    _events: PhantomData<fn() -> E>,
}

impl<E: EventSet, C: Codec> Registrar<'_, E, C> {
    #[must_use]
    pub const fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    /// Declare a payload type the aggregate can produce.
    ///
    /// # Panics
    ///
    /// Panics when another payload type was already declared under
    /// `T::REASON`.
    pub fn event<T>(&mut self) -> &mut Self
    where
        T: DomainEvent + Into<E>,
    {
        let entry = Entry {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            factory: decode_payload::<T, C>,
        };
        if let Some(taken) = self.reasons.get(T::REASON)
            && taken.type_id != entry.type_id
        {
            panic!(
                "{}",
                collision(self.aggregate_type, T::REASON, taken.type_name, entry.type_name)
            );
        }
        tracing::trace!(aggregate_type = self.aggregate_type, reason = T::REASON, "event registered");
        self.reasons.insert(T::REASON, entry);
        self
    }
}
