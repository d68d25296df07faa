//! Selected-row records and tolerance matching.
//!
//! A [`SelectedRow`] is a denormalized snapshot of one offer row: it keeps the
//! numbers and display strings it was selected with so the row can keep
//! rendering even after the originating matrix is replaced or disappears.
//! Matching against recomputed matrices uses a fixed absolute tolerance
//! rather than positional indices.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ids::ProgramId;
use crate::program::{PricedRow, ProgramDescriptor};

/// Absolute tolerance for price and rate matching during reconciliation.
pub const MATCH_TOLERANCE: f64 = 1e-3;

/// Parse a displayed number, stripping currency/percent formatting.
///
/// Accepts raw numbers (`"6.25"`), percent strings (`"6.250%"`), currency
/// strings (`"$400,000.00"`), and parenthesized negatives (`"($1,200.00)"`).
#[must_use]
pub fn parse_display_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (trimmed, negated) =
        if let Some(inner) = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            (inner, true)
        } else {
            (trimmed, false)
        };
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | '%' | ',' | '_') && !c.is_whitespace())
        .collect();
    let parsed: f64 = cleaned.parse().ok()?;
    if parsed.is_finite() {
        Some(if negated { -parsed } else { parsed })
    } else {
        None
    }
}

/// Numeric view of a JSON value: numbers pass through, strings go through
/// [`parse_display_number`], everything else is `None`.
#[must_use]
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_display_number(s),
        _ => None,
    }
}

/// Absolute-tolerance comparison used by the selection reconciler.
#[must_use]
pub fn within_tolerance(a: f64, b: f64) -> bool {
    (a - b).abs() <= MATCH_TOLERANCE
}

#[must_use]
pub fn format_percent(value: f64) -> String {
    format!("{value:.3}%")
}

#[must_use]
pub fn format_currency(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let fraction = cents % 100;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if negative { "-" } else { "" };
    format!("{sign}${grouped}.{fraction:02}")
}

/// The single logical selected row, denormalized at selection time.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SelectedRow {
    pub program_id: ProgramId,
    /// Internal program name, kept as a fallback identity when ids churn.
    pub program_name: String,
    pub row_index: usize,
    /// Anchor values for tolerance matching. Price may be absent for
    /// programs that do not quote one.
    pub price: Option<f64>,
    pub rate: f64,
    /// Formatted field values kept for rendering after the matrix is gone.
    #[serde(default)]
    pub display: BTreeMap<String, String>,
}

impl SelectedRow {
    /// Denormalize a row into a selection record.
    #[must_use]
    pub fn from_row(descriptor: &ProgramDescriptor, row_index: usize, row: &PricedRow) -> Self {
        let mut display = BTreeMap::new();
        display.insert("program".to_string(), descriptor.external_name.clone());
        display.insert("rate".to_string(), format_percent(row.interest_rate));
        if let Some(price) = row.loan_price {
            display.insert("price".to_string(), format!("{price:.3}"));
        }
        if let Some(amount) = row.amount {
            display.insert("amount".to_string(), format_currency(amount));
        }
        if let Some(pitia) = row.pitia {
            display.insert("pitia".to_string(), format_currency(pitia));
        }
        if let Some(dscr) = row.dscr {
            display.insert("dscr".to_string(), format!("{dscr:.2}"));
        }
        Self {
            program_id: descriptor.id.clone(),
            program_name: descriptor.internal_name.clone(),
            row_index,
            price: row.loan_price,
            rate: row.interest_rate,
            display,
        }
    }

    /// Whether `row` is the same offer as this selection: price and rate must
    /// both match within [`MATCH_TOLERANCE`]. A price on exactly one side is
    /// a mismatch, never a wildcard.
    #[must_use]
    pub fn matches_row(&self, row: &PricedRow) -> bool {
        if !within_tolerance(self.rate, row.interest_rate) {
            return false;
        }
        match (self.price, row.loan_price) {
            (Some(a), Some(b)) => within_tolerance(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}
