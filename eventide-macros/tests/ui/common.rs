//! Minimal stand-in for the `eventide` paths the derives expand to.

pub mod codec {
    pub trait Codec {
        type Error;

        fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
        where
            T: serde::Serialize + ?Sized;
    }

    pub struct Json;

    impl Codec for Json {
        type Error = std::convert::Infallible;

        fn serialize<T>(&self, _value: &T) -> Result<Vec<u8>, Self::Error>
        where
            T: serde::Serialize + ?Sized,
        {
            Ok(Vec::new())
        }
    }
}

pub mod event {
    use std::any::{Any, TypeId};

    pub trait DomainEvent: Clone + 'static {
        const REASON: &'static str;
    }

    pub struct Event<E> {
        pub data: E,
    }

    pub struct Payload {
        reason: &'static str,
        value: Box<dyn Any>,
    }

    impl Payload {
        pub fn new<T: DomainEvent>(value: T) -> Self {
            Self {
                reason: T::REASON,
                value: Box::new(value),
            }
        }

        pub fn reason(&self) -> &'static str {
            self.reason
        }

        pub fn downcast<T: DomainEvent>(self) -> Result<T, Self> {
            let reason = self.reason;
            self.value
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|value| Self { reason, value })
        }
    }

    pub trait EventSet: Sized {
        fn reason(&self) -> &'static str;

        fn encode<C: super::codec::Codec>(&self, codec: &C) -> Result<Vec<u8>, C::Error>;

        fn to_payload(&self) -> Payload;

        fn from_payload(payload: Payload) -> Result<Self, Payload>;

        fn register<C: super::codec::Codec>(registrar: &mut super::registry::Registrar<'_, Self, C>);

        fn payload_type(&self) -> TypeId;
    }

    pub const fn reasons_are_unique(reasons: &[&str]) -> bool {
        let mut i = 0;
        while i < reasons.len() {
            let mut j = i + 1;
            while j < reasons.len() {
                if reasons[i].len() == reasons[j].len() && same_bytes(reasons[i], reasons[j]) {
                    return false;
                }
                j += 1;
            }
            i += 1;
        }
        true
    }

    const fn same_bytes(a: &str, b: &str) -> bool {
        let (a, b) = (a.as_bytes(), b.as_bytes());
        let mut i = 0;
        while i < a.len() {
            if a[i] != b[i] {
                return false;
            }
            i += 1;
        }
        true
    }
}

pub mod registry {
    use std::marker::PhantomData;

    use super::event::DomainEvent;

    pub struct Registrar<'a, E, C> {
        pub reasons: Vec<&'static str>,
        marker: PhantomData<(&'a (), E, C)>,
    }

    impl<E, C> Registrar<'_, E, C> {
        pub fn new() -> Self {
            Self {
                reasons: Vec::new(),
                marker: PhantomData,
            }
        }

        pub fn event<T: DomainEvent + Into<E>>(&mut self) -> &mut Self {
            self.reasons.push(T::REASON);
            self
        }
    }
}

pub mod aggregate {
    use super::event::{Event, EventSet};

    pub struct AggregateRoot<E> {
        pub pending: Vec<E>,
    }

    impl<E> Default for AggregateRoot<E> {
        fn default() -> Self {
            Self { pending: Vec::new() }
        }
    }

    pub trait Aggregate: Sized {
        const TYPE: &'static str;
        type Event: EventSet;

        fn root(&self) -> &AggregateRoot<Self::Event>;

        fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

        fn transition(&mut self, event: &Event<Self::Event>);
    }

    pub trait Apply<E> {
        fn apply(&mut self, event: &E);
    }
}
