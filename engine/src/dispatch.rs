//! The dispatch coordinator: one calculation run from snapshot to completed
//! slot store.
//!
//! Every dispatched request carries the run generation; completions are
//! checked against the active store's generation on arrival and discarded
//! when superseded. That check is the whole concurrency story: user edits
//! and newer runs can overlap stale in-flight responses freely because a
//! stale response can never write into the current store.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use ratesheet_types::{LoanId, parse_program_result};

use crate::actor::ActorIdentity;
use crate::staleness::LastRunKey;
use crate::state::{RunHandle, SlotOutcome, SlotStore, SlotUpdate};
use crate::{Engine, PricingApi};

const SLOT_UPDATE_CHANNEL_CAPACITY: usize = 64;

impl Engine {
    /// Start a calculation run for the current input model.
    ///
    /// Fetches the authoritative program list (the prefetcher's list is never
    /// trusted here), applies the broker visibility allow-list when one is
    /// configured (failing closed to the empty set if it cannot be obtained),
    /// replaces the slot store with pending slots, and spawns one dispatch
    /// task per slot.
    ///
    /// The returned [`RunHandle`] yields [`SlotUpdate`]s until every dispatch
    /// has reported; feed them to [`Engine::apply_update`].
    pub async fn start_run<A: PricingApi + Clone>(&mut self, api: &A) -> RunHandle {
        let snapshot = self.snapshot();
        self.generation = self.generation.next();
        let generation = self.generation;

        let programs = match api.fetch_programs(&snapshot).await {
            Ok(programs) => programs,
            Err(e) => {
                tracing::warn!(%generation, "eligibility fetch failed, failing closed: {e}");
                Vec::new()
            }
        };
        let programs = match &self.settings.broker_id {
            Some(broker) => match api.fetch_custom_settings(broker).await {
                Ok(settings) => programs
                    .into_iter()
                    .filter(|program| settings.is_visible(&program.id))
                    .collect(),
                Err(e) => {
                    tracing::warn!(
                        broker = %broker,
                        "program visibility lookup failed, failing closed: {e}"
                    );
                    Vec::new()
                }
            },
            None => programs,
        };

        tracing::debug!(%generation, programs = programs.len(), "allocating slot store");
        self.store = SlotStore::new(generation, programs);
        self.run_snapshot = Some(snapshot.clone());
        self.in_flight = !self.store.is_empty();
        self.reconcile_selection();
        if self.store.is_complete() {
            self.complete_run();
        }

        let (tx, rx) = mpsc::channel(SLOT_UPDATE_CHANNEL_CAPACITY);
        let actor = self.actor.resolve().await;
        let data = dispatch_context(actor.as_ref(), self.loan_id.as_ref());
        for slot in self.store.slots() {
            let api = api.clone();
            let tx = tx.clone();
            let snapshot = snapshot.clone();
            let descriptor = slot.descriptor().clone();
            let position = slot.position();
            let data = data.clone();
            tokio::spawn(async move {
                let program_id = descriptor.id.clone();
                let outcome = match api.dispatch_program(&program_id, &snapshot, data).await {
                    Ok(body) => SlotOutcome::Loaded(parse_program_result(descriptor, &body)),
                    Err(e) => {
                        tracing::warn!(program = %program_id, "pricing dispatch failed: {e}");
                        SlotOutcome::Failed
                    }
                };
                // The receiver may be gone if the host abandoned the run.
                let _ = tx
                    .send(SlotUpdate {
                        generation,
                        position,
                        outcome,
                    })
                    .await;
            });
        }

        RunHandle::new(generation, rx)
    }

    /// Apply one dispatch completion to the current store.
    ///
    /// Returns true when the update was written. Updates whose generation
    /// does not match the active store are discarded - even if they arrive
    /// after a newer run already populated the same position.
    pub fn apply_update(&mut self, update: SlotUpdate) -> bool {
        if update.generation != self.store.generation() {
            tracing::debug!(
                received = %update.generation,
                active = %self.store.generation(),
                position = update.position,
                "discarding dispatch result from superseded run"
            );
            return false;
        }
        if !self.store.write(update.position, update.outcome) {
            tracing::warn!(
                position = update.position,
                "dispatch result position out of range for store"
            );
            return false;
        }
        self.reconcile_selection();
        if self.store.is_complete() {
            self.complete_run();
        }
        true
    }

    /// Convenience driver for hosts without their own event loop: starts a
    /// run and applies every update until the store completes.
    pub async fn run_to_completion<A: PricingApi + Clone>(
        &mut self,
        api: &A,
    ) -> ratesheet_types::RunGeneration {
        let mut handle = self.start_run(api).await;
        while let Some(update) = handle.recv().await {
            self.apply_update(update);
        }
        handle.generation()
    }

    pub(crate) fn complete_run(&mut self) {
        self.in_flight = false;
        self.last_run_key = match self.run_snapshot.as_ref() {
            Some(snapshot) => match snapshot.serialized_key() {
                Ok(key) => LastRunKey::Key(key),
                Err(e) => {
                    tracing::warn!("snapshot serialization failed; results read as stale: {e}");
                    LastRunKey::Unserializable
                }
            },
            None => LastRunKey::NoneYet,
        };
        self.resolve_reload_selection();
    }
}

/// Request context attached to every dispatch body, opaque to pricing.
fn dispatch_context(actor: Option<&ActorIdentity>, loan: Option<&LoanId>) -> Value {
    json!({
        "actor": actor,
        "loanId": loan,
    })
}
