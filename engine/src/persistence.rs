//! Scenario persistence glue.
//!
//! The scenario store itself is an external service; this module owns only
//! the payload shape and the load/save wiring. Loading replaces the input
//! model (through legacy migration) and stashes the persisted selection as
//! reload-pending; it resolves through the round-up rule once the first
//! calculation completes.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use ratesheet_types::{LoanId, SelectedRow};

use crate::migrate::migrate_inputs;
use crate::selection::SelectionState;
use crate::staleness::LastRunKey;
use crate::state::SlotStore;
use crate::{Engine, PricingApi};

/// The persisted scenario shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioPayload {
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub selected: Option<SelectedRow>,
    #[serde(default, rename = "loanId")]
    pub loan_id: Option<LoanId>,
}

impl Engine {
    /// Install a loaded scenario: migrate its inputs into the live model and
    /// stash its selection for reload-time resolution. Any previous run's
    /// results no longer apply and are dropped.
    pub fn load_scenario_payload(&mut self, payload: ScenarioPayload) {
        self.model = migrate_inputs(&payload.inputs, &self.catalog);
        if payload.loan_id.is_some() {
            self.loan_id = payload.loan_id;
        }
        self.selection = match payload.selected {
            Some(selected) => SelectionState::PendingReload(selected),
            None => SelectionState::None,
        };
        self.store = SlotStore::empty();
        self.run_snapshot = None;
        self.in_flight = false;
        self.last_run_key = LastRunKey::NoneYet;
    }

    /// The current state as a persistable scenario payload.
    #[must_use]
    pub fn scenario_payload(&self) -> ScenarioPayload {
        let inputs = self
            .model
            .iter()
            .map(|(code, value)| (code.as_str().to_string(), value.clone()))
            .collect();
        ScenarioPayload {
            inputs,
            outputs: self.outputs_summary(),
            selected: self.selected().cloned(),
            loan_id: self.loan_id.clone(),
        }
    }

    /// Fetch and install a persisted scenario.
    pub async fn load_scenario<A: PricingApi>(
        &mut self,
        api: &A,
        loan: &LoanId,
    ) -> anyhow::Result<()> {
        let raw = api
            .load_scenario(loan)
            .await
            .with_context(|| format!("loading scenario {loan}"))?;
        let payload: ScenarioPayload =
            serde_json::from_value(raw).with_context(|| format!("decoding scenario {loan}"))?;
        self.load_scenario_payload(payload);
        if self.loan_id.is_none() {
            self.loan_id = Some(loan.clone());
        }
        Ok(())
    }

    /// Persist the current state under the engine's loan id.
    pub async fn save_scenario<A: PricingApi>(&self, api: &A) -> anyhow::Result<()> {
        let loan = self
            .loan_id
            .as_ref()
            .context("no loan id set for scenario save")?;
        let payload = serde_json::to_value(self.scenario_payload())
            .context("serializing scenario payload")?;
        api.save_scenario(loan, &payload)
            .await
            .with_context(|| format!("saving scenario {loan}"))?;
        Ok(())
    }

    /// Compact per-program summary of the last results, keyed by program id.
    fn outputs_summary(&self) -> Option<Value> {
        let mut summary = Map::new();
        for slot in self.store.slots() {
            if let Some(result) = slot.state().as_loaded() {
                let highlight = result.highlight_row();
                summary.insert(
                    slot.descriptor().id.as_str().to_string(),
                    json!({
                        "pass": result.pass,
                        "rate": highlight.map(|row| row.interest_rate),
                        "amount": highlight.and_then(|row| row.amount),
                    }),
                );
            }
        }
        if summary.is_empty() {
            None
        } else {
            Some(Value::Object(summary))
        }
    }
}
