//! In-memory snapshot store.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock},
};

use super::{Snapshot, SnapshotStore};
use crate::store::StreamKey;

/// Error type for the in-memory snapshot store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Snapshots of aggregates without an identity cannot be looked up again.
    #[error("snapshot has no aggregate id")]
    MissingId,
}

/// Thread-safe snapshot store keyed by `(aggregate type, id)`.
///
/// Keeps the newest snapshot per instance: saving one with a lower version
/// than the stored snapshot is ignored.
#[derive(Clone, Debug, Default)]
pub struct Store {
    snapshots: Arc<RwLock<HashMap<StreamKey, Snapshot>>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots
            .read()
            .expect("in-memory snapshot store lock poisoned")
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for Store {
    type Error = Error;

    #[tracing::instrument(skip(self, snapshot), fields(aggregate_type = %snapshot.aggregate_type, aggregate_id = %snapshot.id, version = snapshot.version))]
    fn save(&self, snapshot: Snapshot) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
        let result = if snapshot.id.is_empty() {
            Err(Error::MissingId)
        } else {
            let key = StreamKey::new(snapshot.aggregate_type.clone(), snapshot.id.clone());
            let mut snapshots = self
                .snapshots
                .write()
                .expect("in-memory snapshot store lock poisoned");
            let stored = snapshots.get(&key).map(|existing| existing.version);
            match stored {
                Some(stored) if stored > snapshot.version => {
                    tracing::warn!(stored, "ignoring snapshot older than the stored one");
                }
                _ => {
                    snapshots.insert(key, snapshot);
                    tracing::trace!("snapshot stored");
                }
            }
            drop(snapshots);
            Ok(())
        };
        std::future::ready(result)
    }

    fn get<'a>(
        &'a self,
        id: &'a str,
        aggregate_type: &'a str,
    ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send + 'a {
        let key = StreamKey::new(aggregate_type, id);
        let snapshot = self
            .snapshots
            .read()
            .expect("in-memory snapshot store lock poisoned")
            .get(&key)
            .cloned();
        tracing::trace!(found = snapshot.is_some(), "snapshot lookup");
        std::future::ready(Ok(snapshot))
    }
}
