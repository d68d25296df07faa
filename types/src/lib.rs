//! Core data model for the ratesheet pricing engine.
//!
//! # Architecture
//!
//! This crate holds the pure, I/O-free data types shared by the client and
//! engine crates:
//!
//! - [`ids`] - newtype identifiers (`ProgramId`, `BrokerId`, `LoanId`, field codes)
//! - [`snapshot`] - [`LoanInputSnapshot`], the canonical capture of the input
//!   model used for dispatch bodies and staleness comparison
//! - [`program`] - program descriptors, priced row matrices, and the
//!   bridge/default payload discrimination
//! - [`selection`] - [`SelectedRow`] and the tolerance-matching helpers
//! - [`catalog`] - input-definition catalog entries consumed by legacy
//!   payload migration
//!
//! Everything here is a plain value type: construction is infallible or
//! returns `Result`, and nothing performs network or filesystem access.
//! The engine crate owns all mutable state built from these types.

pub mod catalog;
pub mod ids;
pub mod program;
pub mod selection;
pub mod snapshot;

pub use catalog::{Catalog, CatalogEntry, InputType};
pub use ids::{BrokerId, FieldCode, LoanId, ProgramId, RunGeneration};
pub use program::{
    PayloadShape, PricedRow, ProgramDescriptor, ProgramResult, is_bridge_payload,
    parse_program_result,
};
pub use selection::{
    MATCH_TOLERANCE, SelectedRow, format_currency, format_percent, parse_display_number,
    value_to_f64, within_tolerance,
};
pub use snapshot::LoanInputSnapshot;
