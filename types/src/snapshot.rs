//! Canonical input snapshots.
//!
//! A [`LoanInputSnapshot`] is an immutable copy of the live input model taken
//! at calculation time. Its serialized form is the staleness-comparison key:
//! two snapshots are "the same inputs" exactly when their serialized keys are
//! byte-equal. `BTreeMap` ordering makes serialization deterministic, so equal
//! models always produce equal keys.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ids::FieldCode;

/// Immutable capture of all input values at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LoanInputSnapshot {
    values: BTreeMap<FieldCode, Value>,
}

impl LoanInputSnapshot {
    /// Build a snapshot from the live input model.
    ///
    /// Pure and deterministic: equal models yield structurally equal
    /// snapshots. Null and empty-string values are canonicalized away so an
    /// input that was cleared compares equal to one that was never set.
    #[must_use]
    pub fn from_model(model: &BTreeMap<FieldCode, Value>) -> Self {
        let values = model
            .iter()
            .filter(|(_, value)| !is_unset(value))
            .map(|(code, value)| (code.clone(), value.clone()))
            .collect();
        Self { values }
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<FieldCode, Value> {
        &self.values
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<&Value> {
        self.values.get(&FieldCode::from(code))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// The canonical serialized form used for staleness comparison.
    pub fn serialized_key(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.values)
    }

    /// The `inputValues` / `inputValuesById` wire object for pricing requests.
    #[must_use]
    pub fn input_values_by_id(&self) -> serde_json::Map<String, Value> {
        self.values
            .iter()
            .map(|(code, value)| (code.as_str().to_string(), value.clone()))
            .collect()
    }
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn model(entries: &[(&str, Value)]) -> BTreeMap<FieldCode, Value> {
        entries
            .iter()
            .map(|(code, value)| (FieldCode::from(*code), value.clone()))
            .collect()
    }

    #[test]
    fn equal_models_yield_equal_snapshots() {
        let m = model(&[("fico_score", json!(720)), ("number_of_units", json!(4))]);
        let a = LoanInputSnapshot::from_model(&m);
        let b = LoanInputSnapshot::from_model(&m);
        assert_eq!(a, b);
        assert_eq!(
            a.serialized_key().expect("serializable"),
            b.serialized_key().expect("serializable")
        );
    }

    #[test]
    fn cleared_inputs_compare_equal_to_absent_inputs() {
        let with_cleared = model(&[
            ("fico_score", json!(720)),
            ("notes", json!("")),
            ("appraised_value", Value::Null),
        ]);
        let without = model(&[("fico_score", json!(720))]);
        assert_eq!(
            LoanInputSnapshot::from_model(&with_cleared),
            LoanInputSnapshot::from_model(&without)
        );
    }

    #[test]
    fn key_changes_when_any_field_changes() {
        let a = LoanInputSnapshot::from_model(&model(&[("fico_score", json!(720))]));
        let b = LoanInputSnapshot::from_model(&model(&[("fico_score", json!(721))]));
        assert_ne!(
            a.serialized_key().expect("serializable"),
            b.serialized_key().expect("serializable")
        );
    }

    #[test]
    fn wire_object_uses_raw_codes() {
        let snapshot = LoanInputSnapshot::from_model(&model(&[("fico_score", json!(720))]));
        let wire = snapshot.input_values_by_id();
        assert_eq!(wire.get("fico_score"), Some(&json!(720)));
    }
}
