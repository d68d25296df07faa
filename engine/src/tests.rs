//! Unit tests for the engine crate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use ratesheet_client::{ApiError, CustomSettings};
use ratesheet_types::{
    BrokerId, Catalog, CatalogEntry, FieldCode, LoanId, LoanInputSnapshot, ProgramDescriptor,
    ProgramId, SelectedRow, parse_program_result,
};

use crate::actor::ActorIdentity;
use crate::state::{SlotOutcome, SlotState, SlotUpdate};
use crate::{Engine, EngineSettings, PricingApi, ScenarioPayload};

/// In-memory pricing backend with injectable failures and a call capture.
#[derive(Clone, Default)]
struct MockApi {
    programs: Arc<Mutex<Vec<ProgramDescriptor>>>,
    fail_programs: Arc<Mutex<bool>>,
    bodies: Arc<Mutex<HashMap<String, Value>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    visibility: Arc<Mutex<Option<BTreeMap<String, bool>>>>,
    fail_settings: Arc<Mutex<bool>>,
    scenario: Arc<Mutex<Option<Value>>>,
    saved: Arc<Mutex<Option<Value>>>,
    dispatch_data: Arc<Mutex<Vec<Value>>>,
}

impl MockApi {
    fn set_programs(&self, programs: Vec<ProgramDescriptor>) {
        *self.programs.lock().unwrap() = programs;
    }

    fn set_body(&self, program: &str, body: Value) {
        self.bodies.lock().unwrap().insert(program.to_string(), body);
    }

    fn fail_program(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_string());
    }

    fn set_visibility(&self, entries: &[(&str, bool)]) {
        let map = entries
            .iter()
            .map(|(id, visible)| ((*id).to_string(), *visible))
            .collect();
        *self.visibility.lock().unwrap() = Some(map);
    }

    fn set_scenario(&self, payload: Value) {
        *self.scenario.lock().unwrap() = Some(payload);
    }

    fn saved_payload(&self) -> Option<Value> {
        self.saved.lock().unwrap().clone()
    }

    fn last_dispatch_data(&self) -> Option<Value> {
        self.dispatch_data.lock().unwrap().last().cloned()
    }
}

fn injected(detail: &str) -> ApiError {
    ApiError::Transport {
        endpoint: "mock",
        detail: detail.to_string(),
    }
}

impl PricingApi for MockApi {
    async fn fetch_programs(
        &self,
        _snapshot: &LoanInputSnapshot,
    ) -> Result<Vec<ProgramDescriptor>, ApiError> {
        if *self.fail_programs.lock().unwrap() {
            return Err(injected("programs unavailable"));
        }
        Ok(self.programs.lock().unwrap().clone())
    }

    async fn dispatch_program(
        &self,
        program: &ProgramId,
        _snapshot: &LoanInputSnapshot,
        data: Value,
    ) -> Result<Value, ApiError> {
        self.dispatch_data.lock().unwrap().push(data);
        if self.failing.lock().unwrap().contains(program.as_str()) {
            return Err(injected("dispatch refused"));
        }
        Ok(self
            .bodies
            .lock()
            .unwrap()
            .get(program.as_str())
            .cloned()
            .unwrap_or_else(|| json!({ "interestRate": [] })))
    }

    async fn fetch_custom_settings(&self, _broker: &BrokerId) -> Result<CustomSettings, ApiError> {
        if *self.fail_settings.lock().unwrap() {
            return Err(injected("settings unavailable"));
        }
        let entries = self.visibility.lock().unwrap().clone().unwrap_or_default();
        Ok(CustomSettings::from_visibility(entries))
    }

    async fn load_scenario(&self, _loan: &LoanId) -> Result<Value, ApiError> {
        self.scenario
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| injected("no scenario"))
    }

    async fn save_scenario(&self, _loan: &LoanId, payload: &Value) -> Result<(), ApiError> {
        *self.saved.lock().unwrap() = Some(payload.clone());
        Ok(())
    }
}

fn test_catalog() -> Catalog {
    let entries = serde_json::from_value::<Vec<CatalogEntry>>(json!([
        {"input_code": "number_of_units", "input_type": "number"},
        {"input_code": "fico_score", "input_type": "number"},
        {"input_code": "closing_date", "input_type": "date"},
        {"input_code": "interest_only", "input_type": "boolean"}
    ]))
    .expect("valid catalog fixture");
    Catalog::from_entries(entries)
}

fn test_engine() -> Engine {
    let settings = EngineSettings {
        broker_id: None,
        actor_poll_interval: Duration::from_millis(1),
        actor_poll_ceiling: Duration::ZERO,
    };
    Engine::new(settings, test_catalog())
}

fn test_engine_with_broker(broker: &str) -> Engine {
    let settings = EngineSettings {
        broker_id: Some(BrokerId::new(broker)),
        actor_poll_interval: Duration::from_millis(1),
        actor_poll_ceiling: Duration::ZERO,
    };
    Engine::new(settings, test_catalog())
}

fn descriptor(id: &str, name: &str) -> ProgramDescriptor {
    ProgramDescriptor::new(id, name, format!("{name} (retail)"))
}

fn body(pass: bool, rates: &[f64], prices: &[f64], amounts: &[f64]) -> Value {
    json!({
        "pass": pass,
        "highlightIndex": 0,
        "interestRate": rates,
        "loanPrice": prices,
        "loanAmount": amounts,
    })
}

fn loaded_update(
    engine: &Engine,
    position: usize,
    desc: ProgramDescriptor,
    payload: &Value,
) -> SlotUpdate {
    SlotUpdate {
        generation: engine.store().generation(),
        position,
        outcome: SlotOutcome::Loaded(parse_program_result(desc, payload)),
    }
}

#[tokio::test]
async fn payload_builder_is_deterministic() {
    let mut engine = test_engine();
    engine.set_input(FieldCode::from("fico_score"), json!(720));
    engine.set_input(FieldCode::from("number_of_units"), json!(4));
    assert_eq!(engine.snapshot(), engine.snapshot());
    assert_eq!(
        engine.snapshot().serialized_key().expect("serializable"),
        engine.snapshot().serialized_key().expect("serializable"),
    );
}

#[tokio::test]
async fn slot_positions_survive_arrival_order_permutation() {
    let api = MockApi::default();
    let (a, b, c) = (
        descriptor("A", "prog_a"),
        descriptor("B", "prog_b"),
        descriptor("C", "prog_c"),
    );
    api.set_programs(vec![a.clone(), b.clone(), c.clone()]);

    let mut engine = test_engine();
    let _handle = engine.start_run(&api).await;
    assert_eq!(engine.store().len(), 3);

    // Completion order C, A, B; positions stay A, B, C.
    let body_a = body(true, &[6.0], &[100.0], &[400_000.0]);
    let body_b = body(true, &[6.25], &[100.0], &[400_000.0]);
    let body_c = body(true, &[6.5], &[100.0], &[400_000.0]);
    assert!(engine.apply_update(loaded_update(&engine, 2, c, &body_c)));
    assert!(engine.apply_update(loaded_update(&engine, 0, a, &body_a)));
    assert!(engine.apply_update(loaded_update(&engine, 1, b, &body_b)));

    let ids: Vec<&str> = engine
        .store()
        .slots()
        .iter()
        .map(|slot| slot.descriptor().id.as_str())
        .collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    for (position, slot) in engine.store().slots().iter().enumerate() {
        assert_eq!(slot.position(), position);
        let result = slot.state().as_loaded().expect("all slots loaded");
        assert_eq!(result.descriptor.id, slot.descriptor().id);
    }
    assert!(engine.store().is_complete());
}

#[tokio::test]
async fn superseded_generation_updates_are_discarded() {
    let api = MockApi::default();
    let a = descriptor("A", "prog_a");
    api.set_programs(vec![a.clone()]);

    let mut engine = test_engine();
    let stale_handle = engine.start_run(&api).await;
    let stale_generation = stale_handle.generation();
    drop(stale_handle);

    let _handle = engine.start_run(&api).await;
    let fresh = body(true, &[6.0], &[100.0], &[400_000.0]);
    assert!(engine.apply_update(loaded_update(&engine, 0, a.clone(), &fresh)));
    let loaded_before = engine.store().slots()[0].state().clone();

    // A stale response arriving after the newer run already populated the
    // same position must still be discarded.
    let stale_update = SlotUpdate {
        generation: stale_generation,
        position: 0,
        outcome: SlotOutcome::Loaded(parse_program_result(
            a,
            &body(false, &[9.9], &[90.0], &[1.0]),
        )),
    };
    assert!(!engine.apply_update(stale_update));
    assert_eq!(engine.store().slots()[0].state(), &loaded_before);
}

#[tokio::test]
async fn out_of_range_position_is_rejected() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    let mut engine = test_engine();
    let _handle = engine.start_run(&api).await;
    let update = SlotUpdate {
        generation: engine.store().generation(),
        position: 7,
        outcome: SlotOutcome::Failed,
    };
    assert!(!engine.apply_update(update));
}

#[tokio::test]
async fn staleness_tracks_edits_and_recalculation() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.set_input(FieldCode::from("fico_score"), json!(720));
    assert!(!engine.is_stale(), "no completed run yet");

    engine.run_to_completion(&api).await;
    assert!(!engine.is_stale(), "inputs unchanged since completion");

    engine.run_to_completion(&api).await;
    assert!(!engine.is_stale(), "re-running unchanged inputs stays fresh");

    engine.set_input(FieldCode::from("fico_score"), json!(700));
    assert!(engine.is_stale(), "edit after completion marks stale");

    engine.run_to_completion(&api).await;
    assert!(!engine.is_stale(), "recalculation clears staleness");
}

#[tokio::test]
async fn staleness_never_fires_mid_flight() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.set_input(FieldCode::from("fico_score"), json!(720));
    let mut handle = engine.start_run(&api).await;

    engine.set_input(FieldCode::from("fico_score"), json!(700));
    assert!(engine.is_in_flight());
    assert!(!engine.is_stale(), "suppressed while run is in flight");

    while let Some(update) = handle.recv().await {
        engine.apply_update(update);
    }
    assert!(!engine.is_in_flight());
    assert!(engine.is_stale(), "completed run priced the old inputs");
}

#[tokio::test]
async fn partial_failure_never_aborts_sibling_slots() {
    let api = MockApi::default();
    api.set_programs(vec![
        descriptor("A", "prog_a"),
        descriptor("B", "prog_b"),
        descriptor("C", "prog_c"),
    ]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));
    api.fail_program("B");
    api.set_body("C", body(true, &[6.5], &[100.0], &[350_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;

    let states: Vec<bool> = engine
        .store()
        .slots()
        .iter()
        .map(|slot| slot.state().as_loaded().is_some())
        .collect();
    assert_eq!(states, vec![true, false, true]);
    assert!(matches!(
        engine.store().slots()[1].state(),
        SlotState::Failed
    ));
    assert!(engine.store().is_complete());
}

#[tokio::test]
async fn visibility_allow_list_filters_programs() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a"), descriptor("B", "prog_b")]);
    api.set_visibility(&[("A", true), ("B", false)]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine_with_broker("b-17");
    engine.run_to_completion(&api).await;

    assert_eq!(engine.store().len(), 1);
    assert_eq!(engine.store().slots()[0].descriptor().id.as_str(), "A");
}

#[tokio::test]
async fn visibility_lookup_failure_fails_closed() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    *api.fail_settings.lock().unwrap() = true;

    let mut engine = test_engine_with_broker("b-17");
    engine.run_to_completion(&api).await;

    assert!(engine.store().is_empty());
    assert!(engine.store().is_complete());
    assert!(!engine.is_in_flight());
}

#[tokio::test]
async fn eligibility_failure_fails_closed_to_empty_run() {
    let api = MockApi::default();
    *api.fail_programs.lock().unwrap() = true;

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert!(engine.store().is_empty());
    assert!(!engine.is_in_flight());
    assert!(!engine.is_stale());
}

#[tokio::test]
async fn prefetch_swallows_errors() {
    let api = MockApi::default();
    *api.fail_programs.lock().unwrap() = true;
    let engine = test_engine();
    assert!(engine.prefetch_programs(&api).await.is_empty());

    *api.fail_programs.lock().unwrap() = false;
    api.set_programs(vec![descriptor("A", "prog_a")]);
    assert_eq!(engine.prefetch_programs(&api).await.len(), 1);
}

#[tokio::test]
async fn selection_survives_recompute_and_reorder_via_tolerance() {
    let api = MockApi::default();
    let (a, b) = (descriptor("A", "prog_a"), descriptor("B", "prog_b"));
    api.set_programs(vec![a.clone(), b.clone()]);
    api.set_body("A", body(true, &[6.0, 6.25], &[100.0, 100.5], &[400_000.0, 400_000.0]));
    api.set_body("B", body(true, &[7.0], &[99.0], &[500_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert!(engine.select(0, 1));
    assert_eq!(engine.selected().map(|sel| sel.rate), Some(6.25));

    // Next run reorders programs and rows; identity + tolerance matching
    // finds the same offer at its new coordinates.
    api.set_programs(vec![b, a]);
    api.set_body("A", body(true, &[6.25, 6.0], &[100.5, 100.0], &[400_000.0, 400_000.0]));
    engine.run_to_completion(&api).await;

    let selected = engine.selected().expect("selection survives");
    assert_eq!(selected.program_id, ProgramId::new("A"));
    assert_eq!(selected.row_index, 0);
}

#[tokio::test]
async fn selection_clears_when_no_row_matches_within_tolerance() {
    let api = MockApi::default();
    let a = descriptor("A", "prog_a");
    api.set_programs(vec![a]);
    api.set_body("A", body(true, &[6.25], &[100.5], &[400_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert!(engine.select(0, 0));

    // The whole grid repriced out from under the selection.
    api.set_body("A", body(true, &[6.75], &[101.0], &[400_000.0]));
    engine.run_to_completion(&api).await;
    assert!(engine.selected().is_none());
}

#[tokio::test]
async fn selection_clears_when_program_leaves_result_set() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a"), descriptor("B", "prog_b")]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));
    api.set_body("B", body(true, &[7.0], &[99.0], &[500_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert!(engine.select(0, 0));

    api.set_programs(vec![descriptor("B", "prog_b")]);
    engine.run_to_completion(&api).await;
    assert!(engine.selected().is_none());
}

#[tokio::test]
async fn selection_clears_when_selected_program_fails() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert!(engine.select(0, 0));

    api.fail_program("A");
    engine.run_to_completion(&api).await;
    assert!(engine.selected().is_none());
}

#[tokio::test]
async fn selection_survives_pending_slots_during_recompute() {
    let api = MockApi::default();
    let a = descriptor("A", "prog_a");
    api.set_programs(vec![a.clone()]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert!(engine.select(0, 0));

    // Allocating the new pending store must not clear the selection.
    let mut handle = engine.start_run(&api).await;
    assert!(engine.selected().is_some());
    while let Some(update) = handle.recv().await {
        engine.apply_update(update);
    }
    assert!(engine.selected().is_some());
}

fn stored_selection(rate: f64) -> SelectedRow {
    SelectedRow {
        program_id: ProgramId::new("A"),
        program_name: "prog_a".to_string(),
        row_index: 0,
        price: None,
        rate,
        display: BTreeMap::new(),
    }
}

#[tokio::test]
async fn reload_selection_rounds_up_to_next_available_rate() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[5.0, 5.25, 5.5], &[99.0, 100.0, 101.0], &[400_000.0; 3]));

    let mut engine = test_engine();
    engine.restore_selection(stored_selection(5.2));
    engine.run_to_completion(&api).await;

    let selected = engine.selected().expect("round-up resolves");
    assert_eq!(selected.row_index, 1);
    assert_eq!(selected.rate, 5.25);
}

#[tokio::test]
async fn reload_selection_falls_back_to_max_rate() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[5.0, 5.25, 5.5], &[99.0, 100.0, 101.0], &[400_000.0; 3]));

    let mut engine = test_engine();
    engine.restore_selection(stored_selection(6.0));
    engine.run_to_completion(&api).await;

    let selected = engine.selected().expect("max-rate fallback resolves");
    assert_eq!(selected.row_index, 2);
    assert_eq!(selected.rate, 5.5);
}

#[tokio::test]
async fn reload_selection_clears_when_program_is_gone() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("B", "prog_b")]);
    api.set_body("B", body(true, &[7.0], &[99.0], &[500_000.0]));

    let mut engine = test_engine();
    engine.restore_selection(stored_selection(5.2));
    engine.run_to_completion(&api).await;
    assert!(engine.selected().is_none());
}

#[tokio::test]
async fn dispatch_carries_resolved_actor_identity() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.set_loan_id(LoanId::new("loan-9"));
    engine.actor().set(ActorIdentity {
        user_id: "u-1".to_string(),
        display_name: Some("Casey".to_string()),
    });
    engine.run_to_completion(&api).await;

    let data = api.last_dispatch_data().expect("dispatch captured");
    assert_eq!(data["actor"]["user_id"], json!("u-1"));
    assert_eq!(data["loanId"], json!("loan-9"));
}

#[tokio::test]
async fn dispatch_proceeds_with_null_actor_after_ceiling() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[6.0], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;

    let data = api.last_dispatch_data().expect("dispatch captured");
    assert_eq!(data["actor"], Value::Null);
}

#[tokio::test]
async fn presentation_order_sorts_pass_then_amount_then_rate() {
    let api = MockApi::default();
    api.set_programs(vec![
        descriptor("A", "prog_a"),
        descriptor("B", "prog_b"),
        descriptor("C", "prog_c"),
        descriptor("D", "prog_d"),
    ]);
    api.set_body("A", body(true, &[6.5], &[100.0], &[400_000.0]));
    api.set_body("B", body(true, &[6.25], &[100.0], &[500_000.0]));
    api.set_body("C", body(false, &[5.0], &[98.0], &[600_000.0]));
    api.fail_program("D");

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;

    // B and A pass (larger amount first), C loaded but failing, D trails.
    assert_eq!(engine.presentation_order(), vec![1, 0, 2, 3]);
}

#[tokio::test]
async fn presentation_order_breaks_amount_ties_by_rate() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a"), descriptor("B", "prog_b")]);
    api.set_body("A", body(true, &[6.5], &[100.0], &[400_000.0]));
    api.set_body("B", body(true, &[6.25], &[100.0], &[400_000.0]));

    let mut engine = test_engine();
    engine.run_to_completion(&api).await;
    assert_eq!(engine.presentation_order(), vec![1, 0]);
}

#[tokio::test]
async fn scenario_load_migrates_inputs_and_resolves_selection() {
    let api = MockApi::default();
    api.set_programs(vec![descriptor("A", "prog_a")]);
    api.set_body("A", body(true, &[5.0, 5.25, 5.5], &[99.0, 100.0, 101.0], &[400_000.0; 3]));
    api.set_scenario(json!({
        "inputs": {"num_units": 4, "fico": 720, "close_date": "03/15/2024"},
        "selected": {
            "program_id": "A",
            "program_name": "prog_a",
            "row_index": 0,
            "price": null,
            "rate": 5.2,
            "display": {}
        },
        "loanId": "loan-9"
    }));

    let mut engine = test_engine();
    engine
        .load_scenario(&api, &LoanId::new("loan-9"))
        .await
        .expect("scenario loads");

    assert_eq!(
        engine.model().get(&FieldCode::from("number_of_units")),
        Some(&json!(4))
    );
    assert_eq!(
        engine.model().get(&FieldCode::from("fico_score")),
        Some(&json!(720))
    );
    assert_eq!(
        engine.model().get(&FieldCode::from("closing_date")),
        Some(&json!("2024-03-15"))
    );
    assert!(!engine.is_stale(), "fresh load has nothing to be stale against");

    engine.run_to_completion(&api).await;
    let selected = engine.selected().expect("persisted selection resolves");
    assert_eq!(selected.rate, 5.25);
    assert_eq!(selected.row_index, 1);

    engine.save_scenario(&api).await.expect("scenario saves");
    let saved = api.saved_payload().expect("payload captured");
    assert_eq!(saved["loanId"], json!("loan-9"));
    assert_eq!(saved["selected"]["rate"], json!(5.25));
    assert_eq!(saved["outputs"]["A"]["pass"], json!(true));
    let reparsed: ScenarioPayload =
        serde_json::from_value(saved).expect("saved payload round-trips");
    assert_eq!(reparsed.loan_id, Some(LoanId::new("loan-9")));
}

#[tokio::test]
async fn save_without_loan_id_is_an_error() {
    let api = MockApi::default();
    let engine = test_engine();
    assert!(engine.save_scenario(&api).await.is_err());
    assert!(api.saved_payload().is_none());
}
