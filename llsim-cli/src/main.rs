//! # llsim CLI
//!
//! Command-line interface for running LLM-driven agent-based models.
//!
//! Usage:
//!   llsim run <scenario.toml> [--ticks N] [--seed S] [--offline] [--record out.jsonl]
//!   llsim demo [--ticks 3] [--offline] [--backend provider/model]
//!   llsim providers
//!
//! Examples:
//!   llsim demo --offline
//!   llsim demo --backend ollama/llama3.1
//!   llsim run market.toml --ticks 10 --record run.jsonl
//!   RUST_LOG=llsim::telemetry=info,warn llsim run market.toml

mod market;
mod scenario;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use llsim_agent::{JsonLinesSink, Model, TickReport};
use llsim_llm::{BackendRegistry, BackendSelection, ProviderKind};
use scenario::Scenario;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llsim")]
#[command(author, version, about = "llsim - LLM agents for agent-based models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Warnings only (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file
    Run {
        /// Path to the scenario TOML
        scenario: PathBuf,

        /// Number of ticks (defaults to the scenario's `ticks`)
        #[arg(long)]
        ticks: Option<u64>,

        /// Override the activation-order seed
        #[arg(long)]
        seed: Option<u64>,

        /// Answer every backend call with the built-in scripted player
        #[arg(long)]
        offline: bool,

        /// Write one JSON line per agent step to this file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Exit non-zero when the last tick's failure ratio is above this
        #[arg(long, default_value_t = 1.0)]
        max_failure_ratio: f64,
    },
    /// Run the seller/two-buyer negotiation demo
    Demo {
        #[arg(long, default_value_t = 3)]
        ticks: u64,

        #[arg(long)]
        offline: bool,

        /// Backend as provider/model
        #[arg(long, default_value = "openai/gpt-4o-mini")]
        backend: String,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// List recognized providers
    Providers,
}

fn init_tracing(verbose: bool, quiet: bool) {
    let fallback = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

struct RunOptions {
    ticks: u64,
    offline: bool,
    record: Option<PathBuf>,
    max_failure_ratio: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run {
            scenario,
            ticks,
            seed,
            offline,
            record,
            max_failure_ratio,
        } => {
            let mut scenario = Scenario::load(&scenario)?;
            if let Some(seed) = seed {
                scenario.model.seed = seed;
            }
            let options = RunOptions {
                ticks: ticks.unwrap_or(scenario.ticks),
                offline,
                record,
                max_failure_ratio,
            };
            run(scenario, options).await
        }
        Commands::Demo {
            ticks,
            offline,
            backend,
            seed,
            record,
        } => {
            let selection = BackendSelection::parse(&backend)?;
            let mut scenario = market::demo_scenario(ticks, selection);
            if let Some(seed) = seed {
                scenario.model.seed = seed;
            }
            let options = RunOptions {
                ticks,
                offline,
                record,
                max_failure_ratio: 1.0,
            };
            run(scenario, options).await
        }
        Commands::Providers => {
            for kind in ProviderKind::ALL {
                let url = kind.default_base_url().unwrap_or("-");
                let key = kind.default_api_key_env().unwrap_or("-");
                println!("{:<12} {:<45} {}", kind.as_str(), url, key);
            }
            Ok(())
        }
    }
}

async fn run(scenario: Scenario, options: RunOptions) -> Result<()> {
    let mut registry = BackendRegistry::new(scenario.retry.clone());
    if options.offline {
        registry = registry.with_override_all(Arc::new(market::offline_backend()));
    }

    let mut model = scenario.build(&registry, &market::catalog())?;
    if let Some(path) = &options.record {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        model.add_sink(Box::new(JsonLinesSink::new(BufWriter::new(file))));
    }

    let stop = model.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing the current tick");
            stop.stop();
        }
    });

    info!(
        scenario = scenario.name.as_deref().unwrap_or("unnamed"),
        agents = scenario.agents.len(),
        ticks = options.ticks,
        seed = scenario.model.seed,
        offline = options.offline,
        "starting run"
    );
    let reports = model.run(options.ticks).await?;

    for report in &reports {
        print_tick(&model, report);
    }
    print_agents(&model);

    if let Some(last) = reports.last() {
        let ratio = last.failure_ratio();
        if ratio > options.max_failure_ratio {
            bail!(
                "tick {} failure ratio {:.2} exceeds {:.2}",
                last.step,
                ratio,
                options.max_failure_ratio
            );
        }
    }
    Ok(())
}

fn name_of(model: &Model, id: llsim_agent::AgentId) -> String {
    model
        .environment()
        .name_of(id)
        .map(str::to_string)
        .unwrap_or_else(|| id.to_string())
}

fn print_tick(model: &Model, report: &TickReport) {
    let order: Vec<String> = report.order.iter().map(|id| name_of(model, *id)).collect();
    println!(
        "Tick {} ({} ms): {}",
        report.step,
        report.elapsed.as_millis(),
        order.join(" -> ")
    );
    for record in &report.records {
        let action = record
            .action
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".into());
        match record.failure_kind() {
            None => println!("   {:<10} {}", record.agent_name, action),
            Some(kind) => println!("   {:<10} {} [{}]", record.agent_name, action, kind),
        }
    }
    let counts = report.failure_counts();
    if !counts.is_empty() {
        let summary: Vec<String> = counts.iter().map(|(k, n)| format!("{}={}", k, n)).collect();
        println!("   failures: {}", summary.join(", "));
    }
}

fn print_agents(model: &Model) {
    println!();
    println!("Final state after {} ticks:", model.steps());
    for agent in model.agents() {
        let state = serde_json::to_string(agent.state()).unwrap_or_else(|_| "{}".into());
        println!(
            "   {:<10} {} ({} memories)",
            agent.name(),
            state,
            agent.memory().len()
        );
    }
    let board = serde_json::to_string(model.environment().board()).unwrap_or_else(|_| "{}".into());
    println!("   board      {}", board);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "llsim", "run", "market.toml", "--ticks", "5", "--offline", "--record", "out.jsonl", "-q",
        ])
        .unwrap();
        assert!(cli.quiet);
        match cli.command {
            Commands::Run {
                scenario,
                ticks,
                offline,
                record,
                max_failure_ratio,
                ..
            } => {
                assert_eq!(scenario, PathBuf::from("market.toml"));
                assert_eq!(ticks, Some(5));
                assert!(offline);
                assert_eq!(record, Some(PathBuf::from("out.jsonl")));
                assert_eq!(max_failure_ratio, 1.0);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_demo_defaults() {
        let cli = Cli::try_parse_from(["llsim", "demo"]).unwrap();
        match cli.command {
            Commands::Demo { ticks, offline, backend, .. } => {
                assert_eq!(ticks, 3);
                assert!(!offline);
                assert_eq!(backend, "openai/gpt-4o-mini");
            }
            _ => panic!("expected demo"),
        }
    }

    #[tokio::test]
    async fn test_offline_demo_records_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let scenario = market::demo_scenario(2, BackendSelection::new("anthropic", "claude-3-5-haiku"));

        run(
            scenario,
            RunOptions {
                ticks: 2,
                offline: true,
                record: Some(path.clone()),
                max_failure_ratio: 1.0,
            },
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        assert!(lines.iter().all(|l| l["step"].is_u64()));
    }
}
