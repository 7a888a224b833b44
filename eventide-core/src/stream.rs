//! Synchronous in-process pub/sub for committed events.
//!
//! [`EventStream::update`] holds one publish lock for a whole batch, so every
//! subscriber observes each batch contiguously, never interleaved with another
//! publisher's events. Callbacks run on the publishing task: a slow callback
//! stalls the `save` that published. Subscribers that need asynchronous
//! processing hand events off themselves, e.g. into a channel.
//!
//! A panicking callback unwinds out of `update` and the `save` that called
//! it. Neither lock guards data a callback can leave half-written, so a
//! poisoned lock is recovered and the stream stays usable.
//!
//! ```ignore
//! let subscription = repository.subscribe(Filter::aggregate::<Account>(), |event| {
//!     println!("{} v{}", event.aggregate_id, event.version);
//! });
//! // ...
//! subscription.unsubscribe();
//! ```

use std::{
    any::TypeId,
    fmt,
    sync::{
        Arc, Mutex, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use crate::{
    aggregate::Aggregate,
    event::{DomainEvent, PublishedEvent},
};

type Callback = Arc<dyn Fn(&PublishedEvent) + Send + Sync>;

type Subscribers = RwLock<Vec<Arc<Subscriber>>>;

/// Selects which events a subscriber receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Every event.
    All,
    /// Events whose payload is one of these concrete types.
    Events(Vec<TypeId>),
    /// Events of these `(aggregate type, aggregate id)` instances.
    AggregateInstances(Vec<(String, String)>),
    /// Events of any instance of these aggregate types.
    AggregateTypes(Vec<String>),
    /// Events with these `(aggregate type, reason)` pairs.
    Names(Vec<(String, String)>),
    /// Events matching at least one of the inner filters.
    Any(Vec<Filter>),
}

impl Filter {
    #[must_use]
    pub fn event<T: DomainEvent>() -> Self {
        Self::Events(vec![TypeId::of::<T>()])
    }

    #[must_use]
    pub fn instance<A: Aggregate>(id: impl Into<String>) -> Self {
        Self::AggregateInstances(vec![(A::TYPE.to_string(), id.into())])
    }

    #[must_use]
    pub fn aggregate<A: Aggregate>() -> Self {
        Self::AggregateTypes(vec![A::TYPE.to_string()])
    }

    #[must_use]
    pub fn name<A: Aggregate, T: DomainEvent>() -> Self {
        Self::Names(vec![(A::TYPE.to_string(), T::REASON.to_string())])
    }

    /// Match events selected by either filter.
    ///
    /// Same-kind filters merge their lists; mixed kinds become [`Filter::Any`].
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Events(mut a), Self::Events(b)) => {
                a.extend(b);
                Self::Events(a)
            }
            (Self::AggregateInstances(mut a), Self::AggregateInstances(b)) => {
                a.extend(b);
                Self::AggregateInstances(a)
            }
            (Self::AggregateTypes(mut a), Self::AggregateTypes(b)) => {
                a.extend(b);
                Self::AggregateTypes(a)
            }
            (Self::Names(mut a), Self::Names(b)) => {
                a.extend(b);
                Self::Names(a)
            }
            (Self::Any(mut a), Self::Any(b)) => {
                a.extend(b);
                Self::Any(a)
            }
            (Self::Any(mut a), other) | (other, Self::Any(mut a)) => {
                a.push(other);
                Self::Any(a)
            }
            (a, b) => Self::Any(vec![a, b]),
        }
    }

    #[must_use]
    pub fn matches(&self, event: &PublishedEvent) -> bool {
        match self {
            Self::All => true,
            Self::Events(types) => types.contains(&event.data.payload_type()),
            Self::AggregateInstances(instances) => instances
                .iter()
                .any(|(kind, id)| *kind == event.aggregate_type && *id == event.aggregate_id),
            Self::AggregateTypes(kinds) => kinds.iter().any(|kind| *kind == event.aggregate_type),
            Self::Names(names) => names.iter().any(|(kind, reason)| {
                *kind == event.aggregate_type && reason == event.data.reason()
            }),
            Self::Any(filters) => filters.iter().any(|filter| filter.matches(event)),
        }
    }
}

struct Subscriber {
    id: u64,
    filter: Filter,
    callback: Callback,
    active: Arc<AtomicBool>,
}

/// Batch-atomic dispatcher of committed events to filtered subscribers.
///
/// Shared between repositories through an `Arc`.
pub struct EventStream {
    publish: Mutex<()>,
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl EventStream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            publish: Mutex::new(()),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` for events matching `filter`.
    ///
    /// The callback must not publish to the same stream; it runs while the
    /// publish lock is held.
    pub fn subscribe<F>(&self, filter: Filter, callback: F) -> Subscription
    where
        F: Fn(&PublishedEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        tracing::debug!(subscription = id, ?filter, "subscriber added");
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(Subscriber {
                id,
                filter,
                callback: Arc::new(callback),
                active: Arc::clone(&active),
            }));
        Subscription {
            id,
            active,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Deliver a committed batch to every matching subscriber, in order.
    ///
    /// No other batch is delivered until this one completes.
    pub fn update(&self, events: &[PublishedEvent]) {
        if events.is_empty() {
            return;
        }
        let _batch = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        tracing::trace!(
            events = events.len(),
            subscribers = subscribers.len(),
            "publishing batch"
        );
        for subscriber in &subscribers {
            for event in events {
                if !subscriber.active.load(Ordering::Acquire) {
                    break;
                }
                if subscriber.filter.matches(event) {
                    (subscriber.callback)(event);
                }
            }
        }
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Handle to a registered subscriber.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery. Idempotent, and safe to call from inside the
    /// subscriber's own callback; remaining events of the current batch are
    /// not delivered.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|subscriber| subscriber.id != self.id);
        }
        tracing::debug!(subscription = self.id, "subscriber removed");
    }
}
