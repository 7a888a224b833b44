//! Snapshot-assisted replay.
//!
//! A [`Snapshot`] is the serialised state of an aggregate at a known version.
//! [`SnapshotRepository`] seeds an aggregate from its snapshot and then asks
//! the [`EventRepository`] for the events committed after it, so the end state
//! is the same as a full replay without decoding the whole history.
//!
//! Snapshots are only ever taken of fully committed state: an aggregate with
//! pending events is refused.

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::Aggregate,
    codec::{Codec, JsonCodec},
    event::Version,
    repository::{EventRepository, GetError, SaveError},
    store::EventStore,
};

pub mod inmemory;

/// Point-in-time aggregate state plus the header needed to resume replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub aggregate_type: String,
    pub version: Version,
    pub global_version: Version,
    pub state: Vec<u8>,
}

/// Persistence for snapshots. One snapshot per aggregate instance.
// ANCHOR: snapshot_store_trait
pub trait SnapshotStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store `snapshot`, replacing any older one for the same instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn save(&self, snapshot: Snapshot) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

    /// Latest snapshot for an instance, `Ok(None)` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn get<'a>(
        &'a self,
        id: &'a str,
        aggregate_type: &'a str,
    ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send + 'a;
}
// ANCHOR_END: snapshot_store_trait

/// When [`SnapshotRepository::save_events`] also takes a snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// After every save that committed events.
    #[default]
    Always,
    /// Whenever the version crosses a multiple of `n`.
    EveryNEvents(u64),
    /// Never; snapshots are only taken through [`SnapshotRepository::save`].
    Never,
}

impl SnapshotPolicy {
    /// Whether moving from version `before` to `after` warrants a snapshot.
    #[must_use]
    pub const fn should_snapshot(self, before: Version, after: Version) -> bool {
        match self {
            Self::Always => after > before,
            Self::EveryNEvents(0) | Self::Never => false,
            Self::EveryNEvents(n) => before / n != after / n,
        }
    }
}

/// Error returned by [`SnapshotRepository`] operations.
#[derive(Debug, Error)]
pub enum SnapshotError<SnapshotStoreError, StoreError, CodecError>
where
    SnapshotStoreError: std::error::Error + 'static,
    StoreError: std::error::Error + 'static,
    CodecError: std::error::Error + 'static,
{
    /// The aggregate holds uncommitted events; save them first.
    #[error("aggregate has {pending} unsaved events")]
    UnsavedEvents { pending: usize },
    #[error("failed to encode or decode snapshot state: {0}")]
    Codec(#[source] CodecError),
    #[error("snapshot operation failed: {0}")]
    Snapshot(#[source] SnapshotStoreError),
    #[error("failed to replay events after snapshot: {0}")]
    Events(#[source] GetError<StoreError, CodecError>),
    #[error("failed to save events: {0}")]
    Save(#[source] SaveError<StoreError, CodecError>),
}

/// Result alias for [`SnapshotRepository`] operations.
pub type SnapshotResult<SS, S, C> = Result<
    (),
    SnapshotError<<SS as SnapshotStore>::Error, <S as EventStore>::Error, <C as Codec>::Error>,
>;

/// Snapshot layer over an [`EventRepository`].
pub struct SnapshotRepository<SS, S, C = JsonCodec>
where
    SS: SnapshotStore,
    S: EventStore,
    C: Codec,
{
    snapshots: SS,
    events: EventRepository<S, C>,
    policy: SnapshotPolicy,
}

impl<SS, S, C> SnapshotRepository<SS, S, C>
where
    SS: SnapshotStore,
    S: EventStore,
    C: Codec,
{
    #[must_use]
    pub fn new(snapshots: SS, events: EventRepository<S, C>) -> Self {
        Self {
            snapshots,
            events,
            policy: SnapshotPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn event_repository(&self) -> &EventRepository<S, C> {
        &self.events
    }

    #[must_use]
    pub const fn snapshot_store(&self) -> &SS {
        &self.snapshots
    }

    #[must_use]
    pub const fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    /// Snapshot the aggregate's committed state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnsavedEvents`] when the aggregate has pending
    /// events; nothing is written in that case.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_type = A::TYPE, aggregate_id = aggregate.id()))]
    pub async fn save<A>(&self, aggregate: &A) -> SnapshotResult<SS, S, C>
    where
        A: Aggregate + Serialize + Sync,
    {
        let pending = aggregate.pending_events().len();
        if pending > 0 {
            return Err(SnapshotError::UnsavedEvents { pending });
        }
        let state = self
            .events
            .codec()
            .serialize(aggregate)
            .map_err(SnapshotError::Codec)?;
        let snapshot = Snapshot {
            id: aggregate.id().to_string(),
            aggregate_type: A::TYPE.to_string(),
            version: aggregate.version(),
            global_version: aggregate.global_version(),
            state,
        };
        let version = snapshot.version;
        self.snapshots
            .save(snapshot)
            .await
            .map_err(SnapshotError::Snapshot)?;
        tracing::debug!(version, "snapshot saved");
        Ok(())
    }

    /// Commit pending events, then snapshot according to the policy.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Save`] when the events could not be committed;
    /// no snapshot is taken in that case.
    pub async fn save_events<A>(&self, aggregate: &mut A) -> SnapshotResult<SS, S, C>
    where
        A: Aggregate + Serialize + Sync,
    {
        let before = aggregate.root().persisted_version();
        self.events
            .save(aggregate)
            .await
            .map_err(SnapshotError::Save)?;
        if self.policy.should_snapshot(before, aggregate.version()) {
            self.save(aggregate).await?;
        }
        Ok(())
    }

    /// Load the aggregate from its snapshot, if any, then replay newer events.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Events`] wrapping [`GetError::NotFound`] when
    /// neither a snapshot nor events exist.
    pub async fn get<A>(&self, id: &str, aggregate: &mut A) -> SnapshotResult<SS, S, C>
    where
        A: Aggregate + DeserializeOwned,
    {
        self.get_with_cancellation(&CancellationToken::new(), id, aggregate)
            .await
    }

    /// [`get`](Self::get) with cancellation observed during the event replay.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    #[tracing::instrument(skip(self, token, aggregate), fields(aggregate_type = A::TYPE))]
    pub async fn get_with_cancellation<A>(
        &self,
        token: &CancellationToken,
        id: &str,
        aggregate: &mut A,
    ) -> SnapshotResult<SS, S, C>
    where
        A: Aggregate + DeserializeOwned,
    {
        let snapshot = self
            .snapshots
            .get(id, A::TYPE)
            .await
            .map_err(SnapshotError::Snapshot)?;
        let seeded = match snapshot {
            Some(snapshot) => {
                self.restore(snapshot, aggregate)?;
                true
            }
            None => false,
        };

        match self.events.get_with_cancellation(token, id, aggregate).await {
            Err(GetError::NotFound) if seeded => Ok(()),
            result => result.map_err(SnapshotError::Events),
        }
    }

    /// Replace the aggregate's state with the snapshot's and seed its header,
    /// keeping the aggregate's own root (and identity generator).
    fn restore<A>(&self, snapshot: Snapshot, aggregate: &mut A) -> SnapshotResult<SS, S, C>
    where
        A: Aggregate + DeserializeOwned,
    {
        let mut state: A = self
            .events
            .codec()
            .deserialize(&snapshot.state)
            .map_err(SnapshotError::Codec)?;
        std::mem::swap(state.root_mut(), aggregate.root_mut());
        *aggregate = state;
        aggregate
            .root_mut()
            .restore(snapshot.id, snapshot.version, snapshot.global_version);
        tracing::debug!(version = snapshot.version, "aggregate seeded from snapshot");
        Ok(())
    }
}
