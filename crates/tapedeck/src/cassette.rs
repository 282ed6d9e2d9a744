//! The storage contract consumed by the recorder and the equalizer.
//!
//! Core logic never depends on a physical format; any backend that can
//! create, persist, fetch, and enumerate recordings plugs in here.

use crate::errors::TapedeckError;
use crate::recording::Recording;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Lookup filters for enumerating recording ids within a category.
#[derive(Debug, Clone, Default)]
pub struct RecordingLookup {
    /// Earliest recorded-at timestamp (UTC), inclusive.
    pub start_date: Option<DateTime<Utc>>,
    /// Latest recorded-at timestamp (UTC), inclusive.
    pub end_date: Option<DateTime<Utc>>,
    /// Metadata filter, see [`match_against_recorded_metadata`].
    pub metadata_filter: Option<Map<String, Value>>,
    /// Maximum number of ids to return.
    pub limit: Option<usize>,
    /// Return ids in random order instead of insertion order.
    pub random_order: bool,
}

/// Storage driver for recordings ("tape cassette").
pub trait Cassette: Send + Sync {
    /// Creates a new open recording classified under the given category.
    fn create_new_recording(&self, category: &str) -> Result<Recording, TapedeckError>;

    /// Persists the recording and closes it.
    fn save_recording(&self, recording: Recording) -> Result<(), TapedeckError>;

    /// Discards the recording without persisting it.
    fn abort_recording(&self, mut recording: Recording) -> Result<(), TapedeckError> {
        recording.close();
        Ok(())
    }

    /// Fetches a previously saved recording.
    fn get_recording(&self, recording_id: &str) -> Result<Recording, TapedeckError>;

    /// Enumerates ids of saved recordings in the category matching the
    /// lookup filters.
    fn iter_recording_ids(
        &self,
        category: &str,
        lookup: &RecordingLookup,
    ) -> Result<Vec<String>, TapedeckError>;

    /// Returns the category a saved recording was classified under.
    fn extract_recording_category(&self, recording_id: &str) -> Result<String, TapedeckError>;

    /// Release any underlying resources.
    fn close(&self) {}
}

/// Returns whether the recorded metadata satisfies the filter.
///
/// Each filter entry is matched against the recorded value under the same
/// key. A filter value is one of: a literal (equality), a glob-style
/// string pattern, a list of alternatives (OR, matched recursively), or an
/// operator object `{"operator": "="|"<"|"<="|">"|">=", "value": v}`.
/// A key absent from the recorded metadata matches only a null filter
/// value.
pub fn match_against_recorded_metadata(
    filter: &Map<String, Value>,
    recorded: &Map<String, Value>,
) -> bool {
    filter
        .iter()
        .all(|(key, wanted)| match_metadata_value(wanted, recorded.get(key)))
}

fn match_metadata_value(wanted: &Value, recorded: Option<&Value>) -> bool {
    if let Value::Array(alternatives) = wanted {
        return alternatives
            .iter()
            .any(|alternative| match_metadata_value(alternative, recorded));
    }

    if let Some((operator, operand)) = as_operator_object(wanted) {
        return match recorded {
            Some(recorded) => operator_filter(recorded, operator, operand),
            None => false,
        };
    }

    match recorded {
        Some(recorded) => match (wanted, recorded) {
            (Value::String(pattern), Value::String(actual)) => match_string(pattern, actual),
            _ => wanted == recorded,
        },
        None => wanted.is_null(),
    }
}

/// An operator object is a two-key map holding exactly `operator` and
/// `value`; any other object is treated as a literal.
fn as_operator_object(value: &Value) -> Option<(&str, &Value)> {
    let object = value.as_object()?;
    if object.len() != 2 {
        return None;
    }
    let operator = object.get("operator")?.as_str()?;
    let operand = object.get("value")?;
    Some((operator, operand))
}

fn match_string(pattern: &str, actual: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(pattern) => pattern.matches(actual),
        // Unparseable pattern, fall back to literal comparison
        Err(_) => pattern == actual,
    }
}

fn operator_filter(recorded: &Value, operator: &str, operand: &Value) -> bool {
    if operator == "=" {
        return recorded == operand;
    }

    if let (Some(recorded), Some(operand)) = (recorded.as_f64(), operand.as_f64()) {
        return match operator {
            "<" => recorded < operand,
            "<=" => recorded <= operand,
            ">" => recorded > operand,
            ">=" => recorded >= operand,
            _ => false,
        };
    }

    if let (Value::String(recorded), Value::String(operand)) = (recorded, operand) {
        return match operator {
            "<" => recorded < operand,
            "<=" => recorded <= operand,
            ">" => recorded > operand,
            ">=" => recorded >= operand,
            _ => false,
        };
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn filter_by_literal_number() {
        let recorded = map(json!({"key1": 5, "key2": "bla"}));
        assert!(match_against_recorded_metadata(
            &map(json!({"key1": 5})),
            &recorded
        ));
        assert!(!match_against_recorded_metadata(
            &map(json!({"key1": 8})),
            &recorded
        ));
    }

    #[test]
    fn filter_by_literal_string() {
        let recorded = map(json!({"key2": "bla"}));
        assert!(match_against_recorded_metadata(
            &map(json!({"key2": "bla"})),
            &recorded
        ));
        assert!(!match_against_recorded_metadata(
            &map(json!({"key2": "bla1"})),
            &recorded
        ));
    }

    #[test]
    fn filter_by_glob_pattern() {
        let recorded = map(json!({"key2": "operation-alpha"}));
        assert!(match_against_recorded_metadata(
            &map(json!({"key2": "operation-*"})),
            &recorded
        ));
        assert!(!match_against_recorded_metadata(
            &map(json!({"key2": "service-*"})),
            &recorded
        ));
    }

    #[test]
    fn filter_by_list_of_alternatives() {
        let recorded = map(json!({"key2": "bla"}));
        assert!(match_against_recorded_metadata(
            &map(json!({"key2": ["bla", "bla2"]})),
            &recorded
        ));
        assert!(!match_against_recorded_metadata(
            &map(json!({"key2": ["bla1", "bla2"]})),
            &recorded
        ));
    }

    #[test]
    fn filter_by_list_with_nested_operator_object() {
        let recorded = map(json!({"key2": "bla"}));
        let filter = map(json!({
            "key2": ["bla4", "bla5", {"operator": "=", "value": "bla"}]
        }));
        assert!(match_against_recorded_metadata(&filter, &recorded));
    }

    #[test]
    fn filter_by_object_literal_is_deep_equality() {
        let recorded = map(json!({"obj": {"key1": 6, "key2": "bla"}}));
        assert!(match_against_recorded_metadata(
            &map(json!({"obj": {"key1": 6, "key2": "bla"}})),
            &recorded
        ));
        assert!(!match_against_recorded_metadata(
            &map(json!({"obj": {"key1": 6, "key2": "bla1"}})),
            &recorded
        ));
    }

    #[test]
    fn filter_by_operator_objects() {
        let recorded = map(json!({"duration": 5}));
        for (operator, value, expected) in [
            ("=", 5.0, true),
            ("=", 6.0, false),
            ("<", 6.0, true),
            ("<", 5.0, false),
            ("<=", 5.0, true),
            ("<=", 4.0, false),
            (">", 4.0, true),
            (">", 5.0, false),
            (">=", 5.0, true),
            (">=", 6.0, false),
        ] {
            let filter = map(json!({"duration": {"operator": operator, "value": value}}));
            assert_eq!(
                match_against_recorded_metadata(&filter, &recorded),
                expected,
                "operator {operator} value {value}"
            );
        }
    }

    #[test]
    fn operator_objects_compare_strings_lexicographically() {
        let recorded = map(json!({"name": "beta"}));
        let filter = map(json!({"name": {"operator": ">", "value": "alpha"}}));
        assert!(match_against_recorded_metadata(&filter, &recorded));
    }

    #[test]
    fn absent_recorded_value_matches_only_null_filter() {
        let recorded = map(json!({"other": 1}));
        assert!(match_against_recorded_metadata(
            &map(json!({"missing": null})),
            &recorded
        ));
        assert!(!match_against_recorded_metadata(
            &map(json!({"missing": "anything"})),
            &recorded
        ));
        // Null alternative inside a list also matches an absent value
        assert!(match_against_recorded_metadata(
            &map(json!({"missing": [false, null]})),
            &recorded
        ));
    }

    #[test]
    fn three_key_object_is_not_an_operator_object() {
        let recorded = map(json!({"obj": {"operator": "=", "value": 1, "extra": 2}}));
        let filter = map(json!({"obj": {"operator": "=", "value": 1, "extra": 2}}));
        assert!(match_against_recorded_metadata(&filter, &recorded));
    }
}
