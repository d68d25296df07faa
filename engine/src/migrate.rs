//! Legacy input migration.
//!
//! Persisted scenarios predate the canonical field-code catalog and carry a
//! mix of old key spellings. Every key is rewritten through a static
//! legacy-to-canonical table before merging into the live model, with
//! type-aware coercion per the canonical field's declared catalog type.
//!
//! Priority is first-writer-wins: a canonical key already populated is never
//! overwritten by a lower-priority legacy alias, so duplicate-meaning
//! payloads cannot flip-flop depending on key order.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use ratesheet_types::{Catalog, FieldCode, InputType, parse_display_number};

/// Legacy persisted key -> canonical field code.
pub const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("num_units", "number_of_units"),
    ("fico", "fico_score"),
    ("credit_score", "fico_score"),
    ("prop_type", "property_type"),
    ("prop_value", "appraised_value"),
    ("appraisal_value", "appraised_value"),
    ("ltv", "loan_to_value"),
    ("purchase_price", "acquisition_price"),
    ("loan_purpose_type", "loan_purpose"),
    ("int_only", "interest_only"),
    ("io", "interest_only"),
    ("close_date", "closing_date"),
    ("est_close_date", "closing_date"),
    ("monthly_rent", "gross_monthly_rent"),
    ("rent", "gross_monthly_rent"),
    ("zip", "postal_code"),
    ("zip_code", "postal_code"),
    ("state_code", "state"),
    ("str_flag", "is_short_term_rental"),
    ("orig_fee", "origination_fee_percent"),
];

/// Rewrite a persisted key to its canonical field code. Unknown keys pass
/// through unchanged.
#[must_use]
pub fn canonical_code(key: &str) -> &str {
    LEGACY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, canonical)| *canonical)
}

/// Migrate a raw persisted payload into canonical, typed model values.
#[must_use]
pub fn migrate_inputs(raw: &Map<String, Value>, catalog: &Catalog) -> BTreeMap<FieldCode, Value> {
    let mut model = BTreeMap::new();

    // Canonical keys first: an already-canonical value is never displaced
    // by an alias, regardless of payload key order.
    for (key, value) in raw {
        if canonical_code(key) == key {
            model.insert(
                FieldCode::from(key.as_str()),
                coerce_value(value.clone(), catalog.input_type_of(key)),
            );
        }
    }
    for (key, value) in raw {
        let canonical = canonical_code(key);
        if canonical == key {
            continue;
        }
        let code = FieldCode::from(canonical);
        if model.contains_key(&code) {
            tracing::debug!(alias = key, canonical, "skipping lower-priority legacy alias");
            continue;
        }
        model.insert(
            code,
            coerce_value(value.clone(), catalog.input_type_of(canonical)),
        );
    }

    model
}

/// Coerce a persisted value to the canonical field's declared type.
///
/// Unparseable values pass through unchanged; migration is tolerant, and a
/// bad legacy value should surface in the input model rather than vanish.
#[must_use]
pub fn coerce_value(value: Value, input_type: Option<InputType>) -> Value {
    match input_type {
        Some(InputType::Boolean) => coerce_boolean(value),
        Some(InputType::Date) => coerce_date(value),
        Some(InputType::Number | InputType::Currency | InputType::Percent) => coerce_number(value),
        Some(InputType::Text | InputType::Select) | None => value,
    }
}

fn coerce_boolean(value: Value) -> Value {
    match &value {
        Value::Bool(_) => value,
        Value::String(s) => {
            let token = s.trim().to_ascii_lowercase();
            match token.as_str() {
                "true" | "yes" | "y" | "1" | "on" => Value::Bool(true),
                "false" | "no" | "n" | "0" | "off" | "" => Value::Bool(false),
                _ => value,
            }
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Value::Bool(false),
            Some(_) => Value::Bool(true),
            None => value,
        },
        _ => value,
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d"];

fn coerce_date(value: Value) -> Value {
    let Value::String(raw) = &value else {
        return value;
    };
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Value::String(date.format("%Y-%m-%d").to_string());
        }
    }
    // Timestamps persisted by older clients: keep the date part.
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Value::String(datetime.date_naive().format("%Y-%m-%d").to_string());
    }
    value
}

fn coerce_number(value: Value) -> Value {
    match &value {
        Value::Number(_) => value,
        Value::String(s) => match parse_display_number(s).and_then(serde_json::Number::from_f64) {
            Some(number) => Value::Number(number),
            None => value,
        },
        _ => value,
    }
}
