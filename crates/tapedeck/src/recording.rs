//! The `Recording` entity: a keyed capture of one operation execution.

use crate::errors::TapedeckError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Metadata key holding the execution duration in fractional seconds.
pub const DURATION: &str = "_tapedeck_recording_duration";
/// Metadata key holding the UTC timestamp the recording was persisted at.
pub const RECORDED_AT: &str = "_tapedeck_recorded_at";
/// Metadata key holding the operation class/category identity.
pub const OPERATION_CLASS: &str = "_tapedeck_operation_class";
/// Metadata key flagging whether the operation raised.
pub const EXCEPTION_IN_OPERATION: &str = "_tapedeck_exception_in_operation";
/// Metadata key discriminating the persisted storage format.
pub const STORAGE_FORMAT: &str = "_tapedeck_storage_format";

/// Data key alias under which the operation's own result is recorded.
pub const OPERATION_OUTPUT_ALIAS: &str = "_tapedeck_operation";

/// Holds one recorded operation execution: an order-irrelevant mapping of
/// interception key to captured value, plus a metadata map.
///
/// A recording is created by the recorder at the start of an operation,
/// mutated only by interception callbacks while the operation runs, and
/// terminated by either `abort_recording` or `save_recording` on the
/// cassette, after which it is closed and immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    id: String,
    category: String,
    data: BTreeMap<String, Value>,
    metadata: Map<String, Value>,
    closed: bool,
}

impl Recording {
    pub fn new(category: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().simple().to_string(), category)
    }

    pub fn with_id(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            data: BTreeMap::new(),
            metadata: Map::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sets data under the given key. Calling this on a closed recording is
    /// a programming error.
    pub fn set_data(&mut self, key: impl Into<String>, value: Value) {
        assert!(!self.closed, "cannot mutate a closed recording");
        self.data.insert(key.into(), value);
    }

    /// Returns an owned copy of the data under the given key. The returned
    /// value is decoupled from the backing store: mutating it never affects
    /// subsequent reads.
    pub fn get_data(&self, key: &str) -> Result<Value, TapedeckError> {
        self.data
            .get(key)
            .cloned()
            .ok_or_else(|| TapedeckError::RecordingKey(key.to_string()))
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Merges the given metadata into the recording's metadata map.
    pub fn add_metadata(&mut self, metadata: Map<String, Value>) {
        assert!(!self.closed, "cannot mutate a closed recording");
        for (key, value) in metadata {
            self.metadata.insert(key, value);
        }
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Close the recording; no further mutation is allowed.
    pub fn close(&mut self) {
        self.closed = true;
    }
}
