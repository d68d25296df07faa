//! Input-definition catalog.
//!
//! The catalog is owned by an external service; this crate only models the
//! entries the engine needs: the canonical code, the declared value type
//! (which drives coercion during legacy payload migration), and the opaque
//! default/config blobs.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ids::FieldCode;

/// Declared value type of a catalog input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Number,
    Currency,
    Percent,
    Date,
    Boolean,
    Select,
}

/// One input definition from the external catalog.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CatalogEntry {
    pub input_code: FieldCode,
    pub input_type: InputType,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub config: Option<Value>,
}

/// Lookup table over catalog entries, keyed by canonical field code.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<FieldCode, CatalogEntry>,
}

impl Catalog {
    #[must_use]
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.input_code.clone(), entry))
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<&CatalogEntry> {
        self.entries.get(&FieldCode::from(code))
    }

    /// The declared type for a canonical code, if the catalog defines it.
    #[must_use]
    pub fn input_type_of(&self, code: &str) -> Option<InputType> {
        self.get(code).map(|entry| entry.input_type)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
