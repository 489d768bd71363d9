use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use genetic_repair::bridge::{BridgeConfig, ProcessBridge, ProgressLog, WorkerCommand, WorkerServer};
use genetic_repair::core::constraints::Constraint;
use genetic_repair::core::domain::{EvolutionConfig, SelectionMethod};
use genetic_repair::engine::registry::FitnessRegistry;
use genetic_repair::solvers::local::LocalEngine;
use genetic_repair::solvers::{EvolutionEvent, GenStats, RepairEngine};

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Evolutionary repair of text candidates under constraints", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evolve candidates toward the best-scoring solution
    Evolve {
        /// Seed candidate (repeatable)
        #[arg(short, long = "candidate")]
        candidates: Vec<String>,

        /// File with one candidate per line
        #[arg(long)]
        candidates_file: Option<PathBuf>,

        /// Constraint as kind=value, e.g. min_length=4 (repeatable)
        #[arg(short = 'k', long = "constraint")]
        constraints: Vec<Constraint>,

        /// Registered fitness function (code_quality, char_ratio:<c>, target:<text>)
        #[arg(short, long, default_value = "default")]
        fitness: String,

        /// Evolve/refine rounds before the final run
        #[arg(short, long, default_value_t = 0)]
        rounds: u32,

        /// Write per-generation statistics as CSV
        #[arg(long)]
        history: Option<PathBuf>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Repair a solution toward its constraints
    Refine {
        #[arg(short, long)]
        solution: String,

        #[arg(short = 'k', long = "constraint")]
        constraints: Vec<Constraint>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Score solutions with a registered fitness function
    Evaluate {
        #[arg(short, long = "solution", required = true)]
        solutions: Vec<String>,

        #[arg(short, long, default_value = "default")]
        fitness: String,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Serve engine operations over WebSocket (spawned by the bridge)
    Worker {
        #[arg(short, long, default_value_t = 8765)]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunOptions {
    /// JSON file with evolution parameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fixes the random stream for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    population: Option<usize>,

    #[arg(long)]
    generations: Option<usize>,

    #[arg(long, value_enum)]
    selection: Option<SelectionMethod>,

    /// Run through a worker process instead of in-process
    #[arg(long)]
    remote: bool,

    /// Request timeout for remote runs, in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

// --- Initialization Helpers ---

fn load_config(path: Option<&Path>) -> Result<EvolutionConfig> {
    match path {
        Some(path) => EvolutionConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EvolutionConfig::default()),
    }
}

fn build_config(run: &RunOptions) -> Result<EvolutionConfig> {
    let mut config = load_config(run.config.as_deref())?;
    if let Some(seed) = run.seed {
        config.seed = Some(seed);
    }
    if let Some(population) = run.population {
        config.population_size = population;
    }
    if let Some(generations) = run.generations {
        config.max_generations = generations;
    }
    if let Some(selection) = run.selection {
        config.selection_method = selection;
    }
    config.validate()?;
    Ok(config)
}

fn read_candidates(inline: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    let mut candidates = inline;
    if let Some(path) = file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read candidates from {}", path.display()))?;
        candidates.extend(raw.lines().filter(|l| !l.trim().is_empty()).map(str::to_string));
    }
    Ok(candidates)
}

fn write_history(path: &Path, history: &[GenStats]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for stats in history {
        writer.serialize(stats)?;
    }
    writer.flush()?;
    info!("wrote {} generations to {}", history.len(), path.display());
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Either engine behind the shared contract; the bridge falls back to the
/// in-process engine if the worker cannot be started.
enum Backend {
    Local(LocalEngine),
    Remote(ProcessBridge),
}

impl Backend {
    async fn open(engine: LocalEngine, run: &RunOptions) -> Result<Self> {
        if !run.remote {
            return Ok(Backend::Local(engine));
        }
        let config = BridgeConfig {
            worker: WorkerCommand::current_exe().context("Failed to locate own executable")?,
            request_timeout: Duration::from_secs(run.timeout),
            evolution: Some(engine.config().clone()),
            ..Default::default()
        };
        let bridge = ProcessBridge::new(config).with_fallback(engine);
        if let Err(e) = bridge.initialize().await {
            warn!("worker unavailable ({e}); running in-process");
        }
        Ok(Backend::Remote(bridge))
    }

    fn engine(&self) -> &dyn RepairEngine {
        match self {
            Backend::Local(engine) => engine,
            Backend::Remote(bridge) => bridge,
        }
    }

    async fn close(self) -> Result<()> {
        if let Backend::Remote(bridge) = self {
            bridge.close().await?;
        }
        Ok(())
    }
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();
    let registry = Arc::new(FitnessRegistry::with_builtins());

    match cli.command {
        Command::Worker { port, host, config } => {
            let engine = LocalEngine::new(registry, load_config(config.as_deref())?);
            WorkerServer::new(engine, &host, port).run().await?;
        }

        Command::Evolve {
            candidates,
            candidates_file,
            constraints,
            fitness,
            rounds,
            history,
            run,
        } => {
            let candidates = read_candidates(candidates, candidates_file.as_deref())?;
            let (events_tx, events_rx) = crossbeam_channel::unbounded();
            let mut engine = LocalEngine::new(registry, build_config(&run)?);
            if history.is_some() {
                engine = engine.with_observer(events_tx);
            } else {
                drop(events_tx);
            }

            let backend = Backend::open(engine, &run).await?;
            let remote_log = match (&backend, &history) {
                (Backend::Remote(bridge), Some(_)) => {
                    Some(ProgressLog::start(bridge.subscribe_progress()))
                }
                _ => None,
            };

            let result = backend
                .engine()
                .evolve(candidates, constraints, &fitness, rounds)
                .await;

            if let Some(path) = &history {
                // Fallback runs report through the observer, worker runs through the log.
                let mut stats: Vec<GenStats> = events_rx
                    .try_iter()
                    .filter_map(|e| match e {
                        EvolutionEvent::GenerationUpdate(s) => Some(s),
                        _ => None,
                    })
                    .collect();
                if let Some(log) = remote_log {
                    stats.extend(log.finish().await);
                }
                write_history(path, &stats)?;
            }

            backend.close().await?;
            print_json(&result?)?;
        }

        Command::Refine {
            solution,
            constraints,
            run,
        } => {
            let engine = LocalEngine::new(registry, build_config(&run)?);
            let backend = Backend::open(engine, &run).await?;
            let result = backend.engine().refine(solution, constraints).await;
            backend.close().await?;
            print_json(&result?)?;
        }

        Command::Evaluate {
            solutions,
            fitness,
            run,
        } => {
            let engine = LocalEngine::new(registry, build_config(&run)?);
            let backend = Backend::open(engine, &run).await?;
            let result = backend.engine().evaluate(solutions, &fitness).await;
            backend.close().await?;
            print_json(&result?)?;
        }
    }

    Ok(())
}
