//! In-memory cassette, used by the crate's own tests and as a reference
//! backend implementation.

use crate::cassette::{match_against_recorded_metadata, Cassette, RecordingLookup};
use crate::errors::TapedeckError;
use crate::recording::{self, Recording};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Store {
    /// Insertion-ordered ids alongside the serialized recordings.
    order: Vec<String>,
    by_id: HashMap<String, String>,
    last_id: Option<String>,
}

/// Cassette that keeps everything in memory.
///
/// Recordings are stored as serialized JSON on save and deserialized on
/// fetch, so serialization pitfalls show up here exactly as they would
/// against a real backend.
#[derive(Default)]
pub struct InMemoryCassette {
    store: Mutex<Store>,
}

impl InMemoryCassette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the most recently saved recording, for test convenience.
    pub fn last_recording_id(&self) -> Option<String> {
        self.store.lock().expect("cassette lock").last_id.clone()
    }

    pub fn len(&self) -> usize {
        self.store.lock().expect("cassette lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cassette for InMemoryCassette {
    fn create_new_recording(&self, category: &str) -> Result<Recording, TapedeckError> {
        Ok(Recording::new(category))
    }

    fn save_recording(&self, mut recording: Recording) -> Result<(), TapedeckError> {
        // Close before serializing so a fetched copy is immutable too
        recording.close();
        let id = recording.id().to_string();
        let serialized = serde_json::to_string(&recording)
            .map_err(|e| TapedeckError::Serialization(e.to_string()))?;

        let mut store = self.store.lock().expect("cassette lock");
        if !store.by_id.contains_key(&id) {
            store.order.push(id.clone());
        }
        store.by_id.insert(id.clone(), serialized);
        store.last_id = Some(id);
        Ok(())
    }

    fn get_recording(&self, recording_id: &str) -> Result<Recording, TapedeckError> {
        let store = self.store.lock().expect("cassette lock");
        let serialized = store
            .by_id
            .get(recording_id)
            .ok_or_else(|| TapedeckError::NoSuchRecording(recording_id.to_string()))?;
        serde_json::from_str(serialized).map_err(|e| TapedeckError::Serialization(e.to_string()))
    }

    fn iter_recording_ids(
        &self,
        category: &str,
        lookup: &RecordingLookup,
    ) -> Result<Vec<String>, TapedeckError> {
        let store = self.store.lock().expect("cassette lock");
        let mut result = Vec::new();
        for id in &store.order {
            let serialized = match store.by_id.get(id) {
                Some(serialized) => serialized,
                None => continue,
            };
            let recording: Recording = serde_json::from_str(serialized)
                .map_err(|e| TapedeckError::Serialization(e.to_string()))?;
            if recording.category() != category {
                continue;
            }
            if !within_date_range(&recording, lookup.start_date, lookup.end_date) {
                continue;
            }
            if let Some(filter) = &lookup.metadata_filter {
                if !match_against_recorded_metadata(filter, recording.metadata()) {
                    continue;
                }
            }
            result.push(id.clone());
        }
        drop(store);

        if lookup.random_order {
            result.shuffle(&mut rand::thread_rng());
        }
        if let Some(limit) = lookup.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    fn extract_recording_category(&self, recording_id: &str) -> Result<String, TapedeckError> {
        Ok(self.get_recording(recording_id)?.category().to_string())
    }
}

fn within_date_range(
    recording: &Recording,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
) -> bool {
    if start_date.is_none() && end_date.is_none() {
        return true;
    }
    let recorded_at = recording
        .metadata()
        .get(recording::RECORDED_AT)
        .and_then(|value| value.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));
    let Some(recorded_at) = recorded_at else {
        // No usable timestamp, a dated lookup cannot match it
        return false;
    };
    if let Some(start) = start_date {
        if recorded_at < start {
            return false;
        }
    }
    if let Some(end) = end_date {
        if recorded_at > end {
            return false;
        }
    }
    true
}
