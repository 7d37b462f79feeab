//! Sample storage and particle flattening.
//!
//! Sample particles arrive on the event stream with their measurements nested
//! under a `values` list of `{value_id, value}` pairs. [`flatten_particle`]
//! lifts those pairs to top-level keys so each particle reads as one flat
//! record; anything that does not match the expected shape passes through
//! unchanged, tagged [`FlattenResult::Malformed`].
//!
//! [`SampleStore`] keeps flattened particles grouped by stream name and
//! ordered by timestamp. Timestamps are floating-point seconds; [`Timestamp`]
//! gives them a total order so they can key a `BTreeMap`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

/// Seconds-since-epoch sample time, totally ordered via `f64::total_cmp`.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp(pub f64);

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Flattened particles for one stream, ordered by sample time.
pub type StreamSamples = BTreeMap<Timestamp, Value>;

/// Outcome of flattening a particle. Flattening never fails outright; a
/// particle that does not match the expected shape is returned unchanged so
/// the caller can decide whether to keep or drop it.
#[derive(Debug, Clone, PartialEq)]
pub enum FlattenResult {
    /// The particle matched the expected shape and was flattened.
    Flattened(Value),
    /// The particle did not match; the original is returned untouched.
    Malformed(Value),
}

impl FlattenResult {
    /// The contained particle, flattened or not.
    pub fn into_value(self) -> Value {
        match self {
            FlattenResult::Flattened(v) | FlattenResult::Malformed(v) => v,
        }
    }
}

/// Moves each `{value_id, value}` entry of the particle's `values` list to a
/// top-level key, then removes `values`. A particle without an object root,
/// without a `values` array, or with an entry missing a string `value_id` is
/// returned unchanged.
pub fn flatten_particle(mut particle: Value) -> FlattenResult {
    let Some(obj) = particle.as_object_mut() else {
        return FlattenResult::Malformed(particle);
    };
    let Some(values) = obj.get("values").and_then(Value::as_array) else {
        return FlattenResult::Malformed(particle);
    };

    // Validate every entry before touching the particle so a malformed one
    // comes back byte-for-byte intact.
    let mut pairs = Vec::with_capacity(values.len());
    for entry in values {
        let Some(id) = entry.get("value_id").and_then(Value::as_str) else {
            return FlattenResult::Malformed(particle);
        };
        let value = entry.get("value").cloned().unwrap_or(Value::Null);
        pairs.push((id.to_string(), value));
    }

    for (key, value) in pairs {
        obj.insert(key, value);
    }
    obj.remove("values");
    FlattenResult::Flattened(particle)
}

/// Shared, mutex-protected store of flattened sample particles, keyed by
/// stream name and sample time. Cloning is cheap and all clones see the same
/// contents.
#[derive(Debug, Clone, Default)]
pub struct SampleStore {
    inner: Arc<Mutex<HashMap<String, StreamSamples>>>,
}

impl SampleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one flattened particle. A particle with the same stream and
    /// timestamp as an earlier one replaces it.
    pub fn insert(&self, stream: &str, timestamp: f64, particle: Value) {
        match self.inner.lock() {
            Ok(mut map) => {
                map.entry(stream.to_string())
                    .or_default()
                    .insert(Timestamp(timestamp), particle);
            }
            Err(poisoned) => {
                warn!("sample store lock poisoned, recovering");
                poisoned
                    .into_inner()
                    .entry(stream.to_string())
                    .or_default()
                    .insert(Timestamp(timestamp), particle);
            }
        }
    }

    /// Removes all recorded samples.
    pub fn clear(&self) {
        match self.inner.lock() {
            Ok(mut map) => map.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// A point-in-time copy of the whole store.
    pub fn snapshot(&self) -> HashMap<String, StreamSamples> {
        match self.inner.lock() {
            Ok(map) => map.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Total number of recorded samples across all streams.
    pub fn len(&self) -> usize {
        self.snapshot().values().map(BTreeMap::len).sum()
    }

    /// Whether no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
