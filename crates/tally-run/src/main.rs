//! Tally Run - Replays accumulate scenarios
//!
//! Loads each scenario file, compiles its accumulator and replays the
//! insert/retract steps, printing the aggregate state after every step.
//! Exits non-zero when a scenario fails to load or a result check misses.

use clap::Parser;
use std::path::PathBuf;
use tally_core::{CompileLock, Scenario, ScenarioReport, StandardTypes};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tally-run")]
#[command(about = "Replay accumulate scenarios and check their results")]
struct Cli {
    /// Scenario YAML files
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,

    /// Print reports as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_run=info,tally_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // One lock for every compile in the process.
    let lock = CompileLock::new();
    let types = StandardTypes::default();
    let mut failed = false;

    for path in &cli.scenarios {
        info!("Loading scenario from: {}", path.display());

        let scenario = match Scenario::load(path) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                failed = true;
                continue;
            }
        };

        let report = match scenario.run(&lock, &types) {
            Ok(r) => r,
            Err(e) => {
                error!("Scenario '{}' failed: {}", scenario.metadata.name, e);
                failed = true;
                continue;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    error!("Failed to encode report: {}", e);
                    failed = true;
                }
            }
        } else {
            print_report(&report);
        }

        failed |= !report.passed();
    }

    if failed {
        std::process::exit(1);
    }
}

fn print_report(report: &ScenarioReport) {
    let mode = if report.reversible { "reversible" } else { "recomputing" };
    println!("{} ({mode})", report.name);

    for step in &report.steps {
        let key = step.key.as_deref().map(|k| format!(" {k}")).unwrap_or_default();
        let state = step
            .variables
            .iter()
            .map(|(name, value)| format!("{name}={}", render(value)))
            .collect::<Vec<_>>()
            .join(" ");
        let recomputed = if step.recomputed { " [recomputed]" } else { "" };
        println!("  #{:<3} {}{key}: {state}{recomputed}", step.index, step.action);

        if let Some(result) = &step.result {
            match (&step.expected, step.matched) {
                (Some(expected), Some(false)) => {
                    println!("       result {} != expected {}  FAIL", render(result), render(expected))
                }
                (Some(_), _) => println!("       result {}  ok", render(result)),
                (None, _) => println!("       result {}", render(result)),
            }
        }
    }

    let verdict = if report.passed() { "PASS" } else { "FAIL" };
    println!("{verdict}: {} steps, {} mismatches", report.steps.len(), report.mismatches().count());
}

fn render(value: &tally_core::Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}
