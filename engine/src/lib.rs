//! Pricing dispatch coordination for the ratesheet engine.
//!
//! # Architecture
//!
//! The [`Engine`] owns the only mutable shared state in the system: the live
//! input model, the current run's [`SlotStore`], and the selected row. Every
//! other component is a pure function of the current snapshot.
//!
//! A calculation run works like this:
//!
//! 1. [`Engine::start_run`] captures a [`LoanInputSnapshot`], bumps the run
//!    generation, fetches the authoritative program list (filtered through
//!    the broker visibility allow-list, failing closed), and replaces the
//!    slot store with one pending slot per program in descriptor order.
//! 2. One task per slot is spawned; each dispatches a pricing request and
//!    reports a [`SlotUpdate`] tagged with the run generation over an mpsc
//!    channel. Dispatch failures become `Failed` slots and never abort
//!    sibling dispatches.
//! 3. The host drives [`Engine::apply_update`] for each received update.
//!    Updates from superseded generations are discarded; matching updates
//!    write the slot at its fixed position and re-reconcile the selection.
//!    When no slot is pending, the run is complete and the snapshot's
//!    serialized key becomes the staleness baseline.
//!
//! "Concurrent" here means overlapping in-flight requests on a cooperative
//! runtime; user edits between dispatch and arrival are tolerated because a
//! stale generation can never write into the current store.

pub mod actor;
pub mod config;
pub mod dispatch;
pub mod migrate;
pub mod ordering;
pub mod persistence;
pub mod prefetch;
pub mod selection;
pub mod staleness;
pub mod state;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use ratesheet_client::{ApiError, CustomSettings, HttpPricingApi};
use ratesheet_types::{
    BrokerId, Catalog, FieldCode, LoanId, LoanInputSnapshot, ProgramDescriptor, ProgramId,
    RunGeneration, SelectedRow,
};

pub use actor::{ActorIdentity, ActorResolver};
pub use config::{ConfigError, RatesheetConfig};
pub use persistence::ScenarioPayload;
pub use state::{ResultSlot, RunHandle, SlotOutcome, SlotState, SlotStore, SlotUpdate};

use selection::SelectionState;
use staleness::LastRunKey;

/// The pricing backend as the engine sees it.
///
/// Implemented by [`HttpPricingApi`] for production and by in-memory mocks in
/// tests. Methods return `impl Future + Send` so per-slot dispatches can be
/// spawned onto the runtime.
pub trait PricingApi: Send + Sync + 'static {
    fn fetch_programs(
        &self,
        snapshot: &LoanInputSnapshot,
    ) -> impl Future<Output = Result<Vec<ProgramDescriptor>, ApiError>> + Send;

    fn dispatch_program(
        &self,
        program: &ProgramId,
        snapshot: &LoanInputSnapshot,
        data: Value,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    fn fetch_custom_settings(
        &self,
        broker: &BrokerId,
    ) -> impl Future<Output = Result<CustomSettings, ApiError>> + Send;

    fn load_scenario(
        &self,
        loan: &LoanId,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    fn save_scenario(
        &self,
        loan: &LoanId,
        payload: &Value,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

impl PricingApi for HttpPricingApi {
    fn fetch_programs(
        &self,
        snapshot: &LoanInputSnapshot,
    ) -> impl Future<Output = Result<Vec<ProgramDescriptor>, ApiError>> + Send {
        HttpPricingApi::fetch_programs(self, snapshot)
    }

    fn dispatch_program(
        &self,
        program: &ProgramId,
        snapshot: &LoanInputSnapshot,
        data: Value,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send {
        HttpPricingApi::dispatch_program(self, program, snapshot, data)
    }

    fn fetch_custom_settings(
        &self,
        broker: &BrokerId,
    ) -> impl Future<Output = Result<CustomSettings, ApiError>> + Send {
        HttpPricingApi::fetch_custom_settings(self, broker)
    }

    fn load_scenario(&self, loan: &LoanId) -> impl Future<Output = Result<Value, ApiError>> + Send {
        HttpPricingApi::load_scenario(self, loan)
    }

    fn save_scenario(
        &self,
        loan: &LoanId,
        payload: &Value,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        HttpPricingApi::save_scenario(self, loan, payload)
    }
}

/// Engine-level settings, typically derived from [`RatesheetConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// When set, the program list is filtered through this broker's
    /// visibility allow-list; lookup failure yields the empty set.
    pub broker_id: Option<BrokerId>,
    pub actor_poll_interval: Duration,
    pub actor_poll_ceiling: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            broker_id: None,
            actor_poll_interval: actor::ACTOR_POLL_INTERVAL,
            actor_poll_ceiling: actor::ACTOR_POLL_CEILING,
        }
    }
}

/// Owner of all mutable pricing state: the live input model, the current
/// run's slot store, and the selected row.
#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    catalog: Catalog,
    model: BTreeMap<FieldCode, Value>,
    loan_id: Option<LoanId>,
    generation: RunGeneration,
    store: SlotStore,
    run_snapshot: Option<LoanInputSnapshot>,
    in_flight: bool,
    last_run_key: LastRunKey,
    selection: SelectionState,
    actor: ActorResolver,
}

impl Engine {
    #[must_use]
    pub fn new(settings: EngineSettings, catalog: Catalog) -> Self {
        let actor = ActorResolver::new(settings.actor_poll_interval, settings.actor_poll_ceiling);
        Self {
            settings,
            catalog,
            model: BTreeMap::new(),
            loan_id: None,
            generation: RunGeneration::new(0),
            store: SlotStore::empty(),
            run_snapshot: None,
            in_flight: false,
            last_run_key: LastRunKey::NoneYet,
            selection: SelectionState::None,
            actor,
        }
    }

    /// Set one input value. Passing `Value::Null` clears the field.
    pub fn set_input(&mut self, code: impl Into<FieldCode>, value: Value) {
        let code = code.into();
        if value.is_null() {
            self.model.remove(&code);
        } else {
            self.model.insert(code, value);
        }
    }

    #[must_use]
    pub fn model(&self) -> &BTreeMap<FieldCode, Value> {
        &self.model
    }

    /// Capture the live model as a canonical snapshot (the payload builder).
    #[must_use]
    pub fn snapshot(&self) -> LoanInputSnapshot {
        LoanInputSnapshot::from_model(&self.model)
    }

    #[must_use]
    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    #[must_use]
    pub fn generation(&self) -> RunGeneration {
        self.generation
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn loan_id(&self) -> Option<&LoanId> {
        self.loan_id.as_ref()
    }

    pub fn set_loan_id(&mut self, loan: LoanId) {
        self.loan_id = Some(loan);
    }

    /// Handle for the host to publish the authenticated actor identity.
    #[must_use]
    pub fn actor(&self) -> &ActorResolver {
        &self.actor
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn selected(&self) -> Option<&SelectedRow> {
        self.selection.row()
    }
}
