//! Ratesheet CLI - run pricing calculations from the command line.
//!
//! The binary wires [`ratesheet_engine`] (run coordination and state) to
//! [`ratesheet_client`] (the HTTP pricing backend) and renders the completed
//! slot store as a table in presentation order:
//!
//! ```text
//! main() -> RatesheetConfig -> Engine + HttpPricingApi
//!                                   |
//!                                   v
//!               price | programs | migrate
//! ```
//!
//! Scenario files use the persisted payload shape (`inputs`, `selected`,
//! `loanId`); legacy input keys are migrated on load.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ratesheet_client::HttpPricingApi;
use ratesheet_engine::{Engine, RatesheetConfig, ScenarioPayload};
use ratesheet_engine::migrate::migrate_inputs;
use ratesheet_types::{Catalog, CatalogEntry, LoanId, SelectedRow, format_currency, format_percent};

#[derive(Debug, Parser)]
#[command(name = "ratesheet", about = "Loan program pricing runner", version)]
struct Cli {
    /// Path to a TOML config file (api endpoint, broker, dispatch tuning).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a JSON input catalog (array of catalog entries).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Price a scenario and print the results in presentation order.
    Price {
        /// Scenario payload file to price.
        #[arg(long, conflicts_with = "loan")]
        scenario: Option<PathBuf>,

        /// Load the scenario from the backend by loan id instead.
        #[arg(long)]
        loan: Option<String>,

        /// Persist the scenario (with resolved selection) after pricing.
        #[arg(long)]
        save: bool,
    },
    /// List the programs the current configuration is eligible for.
    Programs {
        /// Scenario payload file supplying the input model.
        #[arg(long)]
        scenario: Option<PathBuf>,
    },
    /// Migrate a legacy input payload to canonical field codes and print it.
    Migrate {
        /// JSON file holding the legacy input object.
        input: PathBuf,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::try_new("error").expect("error filter is valid"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RatesheetConfig> {
    match path {
        Some(path) => RatesheetConfig::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(RatesheetConfig::default()),
    }
}

fn load_catalog(path: Option<&PathBuf>) -> Result<Catalog> {
    let Some(path) = path else {
        return Ok(Catalog::from_entries(Vec::new()));
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading catalog from {}", path.display()))?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("decoding catalog from {}", path.display()))?;
    Ok(Catalog::from_entries(entries))
}

fn load_scenario_file(path: &PathBuf) -> Result<ScenarioPayload> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading scenario from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("decoding scenario from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let catalog = load_catalog(cli.catalog.as_ref())?;
    let api = HttpPricingApi::new(config.api_config()).with_retry(config.retry_config());
    let mut engine = Engine::new(config.engine_settings(), catalog);

    match cli.command {
        Command::Price {
            scenario,
            loan,
            save,
        } => {
            if let Some(path) = scenario {
                engine.load_scenario_payload(load_scenario_file(&path)?);
            } else if let Some(loan) = loan {
                engine.load_scenario(&api, &LoanId::new(loan)).await?;
            }

            let generation = engine.run_to_completion(&api).await;
            tracing::debug!(%generation, programs = engine.store().len(), "run complete");
            print_results(&engine);

            if save {
                engine.save_scenario(&api).await?;
                println!("saved scenario {}", display_loan(&engine));
            }
        }
        Command::Programs { scenario } => {
            if let Some(path) = scenario {
                engine.load_scenario_payload(load_scenario_file(&path)?);
            }
            let programs = engine.prefetch_programs(&api).await;
            if programs.is_empty() {
                println!("no eligible programs");
            }
            for program in programs {
                println!("{}  {}", program.id, program.external_name);
            }
        }
        Command::Migrate { input } => {
            let raw = fs::read_to_string(&input)
                .with_context(|| format!("reading inputs from {}", input.display()))?;
            let payload: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&raw)
                    .with_context(|| format!("decoding inputs from {}", input.display()))?;
            let migrated = migrate_inputs(&payload, engine.catalog());
            let rendered: serde_json::Map<String, serde_json::Value> = migrated
                .into_iter()
                .map(|(code, value)| (code.as_str().to_string(), value))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
    }

    Ok(())
}

fn display_loan(engine: &Engine) -> String {
    engine
        .loan_id()
        .map_or_else(|| "(no loan id)".to_string(), ToString::to_string)
}

fn print_results(engine: &Engine) {
    let store = engine.store();
    if store.is_empty() {
        println!("no programs priced");
        return;
    }

    println!("{:<28} {:<8} {:>10} {:>12} {:>14}", "program", "status", "rate", "price", "amount");
    for position in engine.presentation_order() {
        let slot = &store.slots()[position];
        let name = &slot.descriptor().external_name;
        match slot.state().as_loaded() {
            Some(result) => {
                let status = if result.pass { "pass" } else { "fail" };
                let row = result.highlight_row();
                println!(
                    "{:<28} {:<8} {:>10} {:>12} {:>14}",
                    name,
                    status,
                    row.map_or_else(|| "-".to_string(), |r| format_percent(r.interest_rate)),
                    row.and_then(|r| r.loan_price)
                        .map_or_else(|| "-".to_string(), |p| format!("{p:.3}")),
                    row.and_then(|r| r.amount)
                        .map_or_else(|| "-".to_string(), format_currency),
                );
            }
            None => {
                println!("{name:<28} {:<8}", "error");
            }
        }
    }

    if let Some(selected) = engine.selected() {
        println!();
        print_selection(selected);
    }
}

fn print_selection(selected: &SelectedRow) {
    println!(
        "selected: {} row {} at {}",
        selected.program_name,
        selected.row_index,
        format_percent(selected.rate),
    );
    for (label, value) in &selected.display {
        println!("  {label}: {value}");
    }
}
