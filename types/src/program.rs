//! Program descriptors and priced-row matrices.
//!
//! The pricing service returns one result payload per program. Payloads come
//! in two shapes - the default shape and the "bridge" shape - distinguished
//! only by which optional arrays are present, never by a type tag. The
//! discrimination lives in exactly one place ([`is_bridge_payload`]) so call
//! sites cannot drift apart.
//!
//! Matrices arrive as parallel arrays (price, rate, amount, ...) where index
//! *i* across every array describes one offer row. They are zipped into
//! [`PricedRow`] records once, at parse time; nothing downstream re-indexes
//! the raw arrays.

use serde_json::Value;

use crate::ids::ProgramId;
use crate::selection::value_to_f64;

/// A lending program as reported by the eligibility endpoint.
///
/// List order in the eligibility response fixes slot position for the run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProgramDescriptor {
    pub id: ProgramId,
    pub internal_name: String,
    pub external_name: String,
}

impl ProgramDescriptor {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        internal_name: impl Into<String>,
        external_name: impl Into<String>,
    ) -> Self {
        Self {
            id: ProgramId::new(id),
            internal_name: internal_name.into(),
            external_name: external_name.into(),
        }
    }
}

/// One coherent offer row, reified from the payload's parallel arrays.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PricedRow {
    pub loan_price: Option<f64>,
    pub interest_rate: f64,
    pub amount: Option<f64>,
    pub pitia: Option<f64>,
    pub dscr: Option<f64>,
    #[serde(default)]
    pub validations: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Parsed result of one program's pricing dispatch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProgramResult {
    pub descriptor: ProgramDescriptor,
    /// `None` when the payload carried no rate array at all (legacy or
    /// ineligible responses); `Some(vec![])` when it carried an empty one.
    pub matrix: Option<Vec<PricedRow>>,
    pub pass: bool,
    /// Program-suggested default row index within the matrix.
    pub highlight_index: usize,
}

impl ProgramResult {
    /// The program-suggested row, if the index lands inside the matrix.
    #[must_use]
    pub fn highlight_row(&self) -> Option<&PricedRow> {
        self.matrix.as_ref()?.get(self.highlight_index)
    }

    #[must_use]
    pub fn rows(&self) -> &[PricedRow] {
        self.matrix.as_deref().unwrap_or_default()
    }
}

/// Which wire shape a dispatch payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Default,
    Bridge,
}

impl PayloadShape {
    #[must_use]
    pub fn detect(body: &Value) -> Self {
        if is_bridge_payload(body) {
            Self::Bridge
        } else {
            Self::Default
        }
    }
}

/// Arrays that only appear in bridge-shaped payloads.
const BRIDGE_MARKER_ARRAYS: &[&str] = &["totalLoanAmount", "initialLoanAmount", "pitiaInterestOnly"];

/// The single shape predicate: a payload is bridge-shaped iff it carries any
/// bridge-only array. Never inspect field names at call sites; use this.
#[must_use]
pub fn is_bridge_payload(body: &Value) -> bool {
    BRIDGE_MARKER_ARRAYS
        .iter()
        .any(|key| body.get(key).is_some_and(Value::is_array))
}

/// Parse a raw dispatch payload into a [`ProgramResult`].
///
/// Tolerant by design: the interest-rate array length is authoritative for
/// the row count, shorter or missing sibling arrays produce `None` fields,
/// and unrecognized extra fields are ignored. A payload with no rate array
/// yields `matrix: None` rather than an error - per-slot failures are
/// reserved for transport and non-JSON responses.
#[must_use]
pub fn parse_program_result(descriptor: ProgramDescriptor, body: &Value) -> ProgramResult {
    let shape = PayloadShape::detect(body);
    let (amount_key, pitia_key) = match shape {
        PayloadShape::Default => ("loanAmount", "pitia"),
        PayloadShape::Bridge => ("totalLoanAmount", "pitiaInterestOnly"),
    };

    let pass = body.get("pass").and_then(Value::as_bool).unwrap_or(false);
    let highlight_index = body
        .get("highlightIndex")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;

    let rates = number_column(body, "interestRate");
    let matrix = rates.map(|rates| {
        let row_count = rates.len();
        let prices = sibling_column(body, "loanPrice", row_count);
        let amounts = sibling_column(body, amount_key, row_count);
        let pitias = sibling_column(body, pitia_key, row_count);
        let dscrs = sibling_column(body, "dscr", row_count);
        let validations = string_list_column(body, "validations", row_count);
        let warnings = string_list_column(body, "warnings", row_count);

        rates
            .into_iter()
            .enumerate()
            .filter_map(|(i, rate)| {
                let interest_rate = rate?;
                Some(PricedRow {
                    loan_price: prices[i],
                    interest_rate,
                    amount: amounts[i],
                    pitia: pitias[i],
                    dscr: dscrs[i],
                    validations: validations[i].clone(),
                    warnings: warnings[i].clone(),
                })
            })
            .collect()
    });

    ProgramResult {
        descriptor,
        matrix,
        pass,
        highlight_index,
    }
}

/// Read a numeric column. `None` when the key is absent or not an array.
fn number_column(body: &Value, key: &str) -> Option<Vec<Option<f64>>> {
    let array = body.get(key)?.as_array()?;
    Some(array.iter().map(value_to_f64).collect())
}

/// Read a numeric column padded/truncated to the authoritative row count.
fn sibling_column(body: &Value, key: &str, row_count: usize) -> Vec<Option<f64>> {
    let mut column = number_column(body, key).unwrap_or_default();
    column.resize(row_count, None);
    column
}

/// Read a per-row string-list column. Rows may carry a single string or a
/// list of strings; both normalize to `Vec<String>`.
fn string_list_column(body: &Value, key: &str, row_count: usize) -> Vec<Vec<String>> {
    let mut column: Vec<Vec<String>> = body
        .get(key)
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .map(|entry| match entry {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) => items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                })
                .collect()
        })
        .unwrap_or_default();
    column.resize(row_count, Vec::new());
    column
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn descriptor() -> ProgramDescriptor {
        ProgramDescriptor::new("p-30yr", "dscr_30_year", "30-Year DSCR")
    }

    #[test]
    fn detects_bridge_shape_by_marker_arrays_only() {
        let bridge = json!({"interestRate": [9.5], "totalLoanAmount": [800_000.0]});
        let default = json!({"interestRate": [6.5], "loanAmount": [400_000.0]});
        // A scalar with a bridge name is not a marker.
        let scalar_marker = json!({"interestRate": [6.5], "totalLoanAmount": 800_000.0});
        assert!(is_bridge_payload(&bridge));
        assert!(!is_bridge_payload(&default));
        assert!(!is_bridge_payload(&scalar_marker));
        assert_eq!(PayloadShape::detect(&bridge), PayloadShape::Bridge);
    }

    #[test]
    fn parses_default_shape_into_rows() {
        let body = json!({
            "pass": true,
            "highlightIndex": 1,
            "loanPrice": [99.5, 100.0, 100.5],
            "interestRate": [6.0, 6.25, 6.5],
            "loanAmount": [400_000.0, 400_000.0, 395_000.0],
            "pitia": [2900.0, 2950.0, 3000.0],
            "dscr": [1.21, 1.19, 1.17],
            "validations": [[], ["seasoning"], []],
            "warnings": ["rate near ceiling", [], []]
        });
        let result = parse_program_result(descriptor(), &body);
        assert!(result.pass);
        assert_eq!(result.highlight_index, 1);
        let rows = result.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].interest_rate, 6.25);
        assert_eq!(rows[1].amount, Some(400_000.0));
        assert_eq!(rows[1].validations, vec!["seasoning".to_string()]);
        assert_eq!(rows[0].warnings, vec!["rate near ceiling".to_string()]);
        assert_eq!(result.highlight_row().map(|r| r.interest_rate), Some(6.25));
    }

    #[test]
    fn parses_bridge_shape_amount_and_pitia_variants() {
        let body = json!({
            "pass": true,
            "interestRate": [9.75, 10.0],
            "loanPrice": [98.0, 99.0],
            "totalLoanAmount": [850_000.0, 840_000.0],
            "initialLoanAmount": [700_000.0, 700_000.0],
            "pitiaInterestOnly": [6906.25, 7000.0]
        });
        let result = parse_program_result(descriptor(), &body);
        let rows = result.rows();
        assert_eq!(rows[0].amount, Some(850_000.0));
        assert_eq!(rows[0].pitia, Some(6906.25));
    }

    #[test]
    fn ragged_sibling_arrays_pad_with_none() {
        let body = json!({
            "interestRate": [6.0, 6.25, 6.5],
            "loanAmount": [400_000.0]
        });
        let result = parse_program_result(descriptor(), &body);
        let rows = result.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].amount, Some(400_000.0));
        assert_eq!(rows[1].amount, None);
        assert_eq!(rows[2].loan_price, None);
    }

    #[test]
    fn missing_rate_array_yields_no_matrix() {
        let result = parse_program_result(descriptor(), &json!({"pass": false}));
        assert!(result.matrix.is_none());
        assert!(result.highlight_row().is_none());
    }

    #[test]
    fn numeric_strings_in_columns_are_parsed() {
        let body = json!({
            "interestRate": ["6.250%", "6.500%"],
            "loanPrice": ["$100.00", "$100.50"]
        });
        let rows_result = parse_program_result(descriptor(), &body);
        let rows = rows_result.rows();
        assert_eq!(rows[0].interest_rate, 6.25);
        assert_eq!(rows[1].loan_price, Some(100.5));
    }

    #[test]
    fn out_of_range_highlight_yields_no_highlight_row() {
        let body = json!({"interestRate": [6.0], "highlightIndex": 9});
        let result = parse_program_result(descriptor(), &body);
        assert!(result.highlight_row().is_none());
    }
}
