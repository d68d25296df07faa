//! Best-effort eligibility prefetch.

use ratesheet_types::ProgramDescriptor;

use crate::{Engine, PricingApi};

impl Engine {
    /// Fetch a program list for placeholder rendering only.
    ///
    /// Non-authoritative: [`Engine::start_run`] re-fetches the list at
    /// calculation start and the two may differ. Errors are swallowed so a
    /// flaky prefetch can never block or fail a calculation.
    pub async fn prefetch_programs<A: PricingApi>(&self, api: &A) -> Vec<ProgramDescriptor> {
        match api.fetch_programs(&self.snapshot()).await {
            Ok(programs) => programs,
            Err(e) => {
                tracing::warn!("placeholder prefetch failed: {e}");
                Vec::new()
            }
        }
    }
}
