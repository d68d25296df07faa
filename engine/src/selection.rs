//! The selection reconciler.
//!
//! One logical selected row survives recomputation, program-set reordering,
//! and cross-session reload. Two deliberately different matching policies:
//!
//! - **Live reconciliation** (after any store change): resolve the program by
//!   id, then by name; within its matrix, find the row whose price and rate
//!   both match the stored values within absolute tolerance. No match means
//!   the selection is cleared - never silently repointed.
//! - **Reload resolution** (first completed store after a scenario load):
//!   discrete re-pricing means the exact historical rate may no longer
//!   exist, so pick the row with the smallest rate >= the stored target,
//!   falling back to the maximum-rate row.

use ratesheet_types::{PricedRow, SelectedRow};

use crate::state::{ResultSlot, SlotState, SlotStore};
use crate::Engine;

/// Selection lifecycle.
///
/// Transitions: None -> Live (user selects), Live -> None (reconciliation
/// fails or user clears), None -> PendingReload (scenario load),
/// PendingReload -> Live | None (first completed store).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectionState {
    None,
    /// Selected against a live matrix; reconciled by tolerance matching.
    Live(SelectedRow),
    /// Restored from persistence; resolves by round-up when results exist.
    PendingReload(SelectedRow),
}

impl SelectionState {
    pub(crate) fn row(&self) -> Option<&SelectedRow> {
        match self {
            Self::None => None,
            Self::Live(row) | Self::PendingReload(row) => Some(row),
        }
    }
}

enum LiveDecision {
    Keep,
    Repoint(usize),
    Clear,
}

impl Engine {
    /// Select a row out of the current store, denormalizing its display
    /// values immediately. Returns false when the slot or row does not
    /// exist (nothing changes in that case).
    pub fn select(&mut self, position: usize, row_index: usize) -> bool {
        let Some(slot) = self.store.slots().get(position) else {
            return false;
        };
        let SlotState::Loaded(result) = slot.state() else {
            return false;
        };
        let Some(row) = result.rows().get(row_index) else {
            return false;
        };
        self.selection =
            SelectionState::Live(SelectedRow::from_row(slot.descriptor(), row_index, row));
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection = SelectionState::None;
    }

    /// Install a selection restored from persistence. It resolves against
    /// the next completed store via the round-up rule.
    pub fn restore_selection(&mut self, selected: SelectedRow) {
        self.selection = SelectionState::PendingReload(selected);
    }

    /// Re-resolve a live selection against the current store.
    ///
    /// Pending slots for the selected program leave it untouched; the
    /// selection survives the recompute window and re-resolves as results
    /// land. Only resolved evidence (program absent, slot failed, no row
    /// within tolerance) clears it.
    pub(crate) fn reconcile_selection(&mut self) {
        let SelectionState::Live(selected) = &self.selection else {
            return;
        };
        let decision = match find_slot(&self.store, selected) {
            None => {
                tracing::debug!(
                    program = %selected.program_id,
                    "selected program absent from result set; clearing selection"
                );
                LiveDecision::Clear
            }
            Some(slot) => match slot.state() {
                SlotState::Pending => LiveDecision::Keep,
                SlotState::Failed => {
                    tracing::debug!(
                        program = %selected.program_id,
                        "selected program failed to price; clearing selection"
                    );
                    LiveDecision::Clear
                }
                SlotState::Loaded(result) => {
                    match result
                        .rows()
                        .iter()
                        .position(|row| selected.matches_row(row))
                    {
                        Some(index) => LiveDecision::Repoint(index),
                        None => {
                            tracing::debug!(
                                program = %selected.program_id,
                                "no row within tolerance of selection; clearing"
                            );
                            LiveDecision::Clear
                        }
                    }
                }
            },
        };
        match decision {
            LiveDecision::Keep => {}
            LiveDecision::Repoint(index) => {
                if let SelectionState::Live(selected) = &mut self.selection {
                    selected.row_index = index;
                }
            }
            LiveDecision::Clear => self.selection = SelectionState::None,
        }
    }

    /// Resolve a reload-pending selection against a completed store.
    pub(crate) fn resolve_reload_selection(&mut self) {
        let SelectionState::PendingReload(selected) = &self.selection else {
            return;
        };
        let resolved = find_slot(&self.store, selected).and_then(|slot| {
            let SlotState::Loaded(result) = slot.state() else {
                return None;
            };
            let rows = result.rows();
            let index = round_up_index(rows, selected.rate)?;
            Some(SelectedRow::from_row(slot.descriptor(), index, &rows[index]))
        });
        self.selection = match resolved {
            Some(row) => SelectionState::Live(row),
            None => {
                tracing::debug!(
                    program = %selected.program_id,
                    "persisted selection did not resolve against reloaded results; clearing"
                );
                SelectionState::None
            }
        };
    }
}

/// Resolve the selected program in the store: by id first, by internal or
/// external name as a fallback for result sets with regenerated ids.
fn find_slot<'a>(store: &'a SlotStore, selected: &SelectedRow) -> Option<&'a ResultSlot> {
    store
        .slots()
        .iter()
        .find(|slot| slot.descriptor().id == selected.program_id)
        .or_else(|| {
            store.slots().iter().find(|slot| {
                slot.descriptor().internal_name == selected.program_name
                    || slot.descriptor().external_name == selected.program_name
            })
        })
}

/// Round-up row matching for reloaded selections: the smallest rate >= the
/// target, else the maximum available rate. `None` only for empty matrices.
fn round_up_index(rows: &[PricedRow], target: f64) -> Option<usize> {
    let at_or_above = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.interest_rate >= target)
        .min_by(|(_, a), (_, b)| {
            a.interest_rate
                .partial_cmp(&b.interest_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if let Some((index, _)) = at_or_above {
        return Some(index);
    }
    rows.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.interest_rate
                .partial_cmp(&b.interest_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(index, _)| index)
}
