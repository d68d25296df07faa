//! Presentation ordering for priced results.
//!
//! Display order is computed on demand once data exists and is independent
//! of slot position: passing programs first, then inferred amount
//! descending, then rate ascending. Failed and pending slots trail in
//! position order. Amount and rate are read from each program's highlight
//! row.

use std::cmp::Ordering;

use crate::state::{ResultSlot, SlotStore};
use crate::Engine;

/// Positions of the store's slots in presentation order.
#[must_use]
pub fn presentation_order(store: &SlotStore) -> Vec<usize> {
    let mut order: Vec<usize> = (0..store.len()).collect();
    order.sort_by(|&a, &b| {
        compare_slots(&store.slots()[a], &store.slots()[b]).then_with(|| a.cmp(&b))
    });
    order
}

fn compare_slots(a: &ResultSlot, b: &ResultSlot) -> Ordering {
    match (a.state().as_loaded(), b.state().as_loaded()) {
        (Some(ra), Some(rb)) => {
            // pass desc
            rb.pass
                .cmp(&ra.pass)
                .then_with(|| {
                    // amount desc
                    total_cmp_desc(
                        ra.highlight_row().and_then(|row| row.amount),
                        rb.highlight_row().and_then(|row| row.amount),
                    )
                })
                .then_with(|| {
                    // rate asc
                    total_cmp_asc(
                        ra.highlight_row().map(|row| row.interest_rate),
                        rb.highlight_row().map(|row| row.interest_rate),
                    )
                })
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn total_cmp_desc(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.unwrap_or(f64::NEG_INFINITY);
    let b = b.unwrap_or(f64::NEG_INFINITY);
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn total_cmp_asc(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.unwrap_or(f64::INFINITY);
    let b = b.unwrap_or(f64::INFINITY);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl Engine {
    /// Slot positions of the current store in presentation order.
    #[must_use]
    pub fn presentation_order(&self) -> Vec<usize> {
        presentation_order(&self.store)
    }
}
