//! Aggregate identity generation.

use std::{fmt, sync::Arc};

use rand::{Rng, distr::Alphanumeric};

/// Length of identities produced by [`IdGenerator::random`].
pub const RANDOM_ID_LENGTH: usize = 20;

/// Produces a fresh identity for an aggregate on its first tracked change.
///
/// Each [`AggregateRoot`](crate::aggregate::AggregateRoot) owns its generator,
/// so tests can inject deterministic identities per instance.
#[derive(Clone)]
pub struct IdGenerator(Arc<dyn Fn() -> String + Send + Sync>);

impl IdGenerator {
    pub fn new<F>(generate: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self(Arc::new(generate))
    }

    /// Random alphanumeric identities drawn from the thread-local CSPRNG.
    #[must_use]
    pub fn random() -> Self {
        Self::new(random_id)
    }

    #[must_use]
    pub fn generate(&self) -> String {
        (self.0)()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdGenerator").finish_non_exhaustive()
    }
}

fn random_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ID_LENGTH)
        .map(char::from)
        .collect()
}
