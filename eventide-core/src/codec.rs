//! Payload serialisation.
//!
//! The core never looks inside event payloads or metadata. Everything that
//! crosses the store boundary is bytes produced by a [`Codec`], which is chosen
//! once when the repository is constructed.

use serde::{Serialize, de::DeserializeOwned};

/// Serialisation strategy for event payloads, metadata and snapshots.
pub trait Codec: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialise `value` into bytes.
    ///
    /// # Errors
    ///
    /// Returns the codec error when the value cannot be represented.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized;

    /// Deserialise bytes previously produced by [`Codec::serialize`].
    ///
    /// # Errors
    ///
    /// Returns the codec error when `data` does not decode into `T`.
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}
