//! Staleness detection: are the displayed results still the results of the
//! inputs on screen?

use ratesheet_types::LoanInputSnapshot;

use crate::Engine;

/// Baseline the current results were computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LastRunKey {
    /// No run has completed yet; there is nothing to be stale against.
    NoneYet,
    /// Serialized snapshot key of the last completed run.
    Key(String),
    /// The last run's snapshot would not serialize; read as always stale.
    Unserializable,
}

impl Engine {
    /// Whether the displayed results no longer correspond to the live inputs.
    ///
    /// Pure comparison of serialized snapshots; marking stale is a signal,
    /// never a data mutation. Never fires while a run is in flight - the run
    /// in progress is already the answer to the current edits.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        if self.in_flight {
            return false;
        }
        match &self.last_run_key {
            LastRunKey::NoneYet => false,
            LastRunKey::Unserializable => true,
            LastRunKey::Key(last) => {
                match LoanInputSnapshot::from_model(&self.model).serialized_key() {
                    Ok(current) => current != *last,
                    Err(e) => {
                        tracing::warn!("live snapshot serialization failed; reading stale: {e}");
                        true
                    }
                }
            }
        }
    }
}
