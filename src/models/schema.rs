//! Per-source schema snapshots used by drift detection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The scalar shape of a field's value, coarse enough to detect drift
/// without caring about exact numeric representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarTypeTag {
    String,
    Number,
    Bool,
    Null,
    Other,
}

impl ScalarTypeTag {
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(_) => ScalarTypeTag::String,
            serde_json::Value::Number(_) => ScalarTypeTag::Number,
            serde_json::Value::Bool(_) => ScalarTypeTag::Bool,
            serde_json::Value::Null => ScalarTypeTag::Null,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => ScalarTypeTag::Other,
        }
    }
}

/// The last observed `{fieldName -> scalarTypeTag}` shape for a source,
/// compared structurally (sorted field set, per-field type) on every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub fields: BTreeMap<String, ScalarTypeTag>,
}

impl SchemaSnapshot {
    pub fn from_record(record: &serde_json::Map<String, serde_json::Value>) -> Self {
        let fields = record
            .iter()
            .map(|(k, v)| (k.clone(), ScalarTypeTag::of(v)))
            .collect();
        SchemaSnapshot { fields }
    }

    /// Fields present in `self` but absent (or not sharing the same type tag) in `other`.
    pub fn removed_since(&self, other: &SchemaSnapshot) -> Vec<&str> {
        self.fields
            .keys()
            .filter(|k| !other.fields.contains_key(k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }

    /// Fields present in `other` but absent in `self`.
    pub fn added_in(&self, other: &SchemaSnapshot) -> Vec<&str> {
        other
            .fields
            .keys()
            .filter(|k| !self.fields.contains_key(k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }
}
