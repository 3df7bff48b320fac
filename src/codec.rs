//! Snapshot encoders.
//!
//! A codec turns the whole key/value map into one byte buffer and back. Any format works as long as
//! `decode(encode(map)) == map` for every value the cache is going to hold.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::error::CodecError;

pub trait SnapshotCodec<K, V>: Send + Sync + 'static {
    fn encode(&self, map: &HashMap<K, V>) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<HashMap<K, V>, CodecError>;
}

/// Stores the snapshot as a single JSON object keyed by the cache keys.
///
/// Keys must serialize as strings or integers since JSON object keys can't be anything else.
pub struct JsonCodec<K, V> {
    pretty:  bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> JsonCodec<K, V> {
    pub fn new() -> Self {
        Self {
            pretty:  false,
            _marker: PhantomData,
        }
    }

    /// Indented output. Larger, but friendly to anyone inspecting the cache file by hand.
    pub fn pretty() -> Self {
        Self {
            pretty:  true,
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for JsonCodec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Debug for JsonCodec<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonCodec").field("pretty", &self.pretty).finish()
    }
}

impl<K, V> SnapshotCodec<K, V> for JsonCodec<K, V>
where
    K: Serialize + DeserializeOwned + Hash + Eq + 'static,
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, map: &HashMap<K, V>) -> Result<Vec<u8>, CodecError> {
        Ok(if self.pretty {
            serde_json::to_vec_pretty(map)?
        }
        else {
            serde_json::to_vec(map)?
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<HashMap<K, V>, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary snapshot format.
#[cfg(feature = "postcard")]
pub struct PostcardCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

#[cfg(feature = "postcard")]
impl<K, V> PostcardCodec<K, V> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

#[cfg(feature = "postcard")]
impl<K, V> Default for PostcardCodec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "postcard")]
impl<K, V> SnapshotCodec<K, V> for PostcardCodec<K, V>
where
    K: Serialize + DeserializeOwned + Hash + Eq + 'static,
    V: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, map: &HashMap<K, V>) -> Result<Vec<u8>, CodecError> {
        Ok(postcard::to_stdvec(map)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<HashMap<K, V>, CodecError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
