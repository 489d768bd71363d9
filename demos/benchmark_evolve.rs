use genetic_repair::core::domain::EvolutionConfig;
use genetic_repair::engine::evaluator::{FnFitness, FitnessFunction};
use genetic_repair::engine::registry::target_match;
use genetic_repair::solvers::ga::GeneticAlgorithm;
use genetic_repair::solvers::EvolutionEvent;
use crossbeam_channel::unbounded;
use std::time::{Duration, Instant};
use anyhow::Result;

const TARGET: &str = "fn repair(input: &str) -> Result<String> { return Ok(input.trim().into()); }";

/// Async fitness with a small artificial latency, standing in for a remote scorer.
fn latency_fitness() -> impl FitnessFunction {
    FnFitness::new("target_with_latency", |s: String| async move {
        tokio::time::sleep(Duration::from_micros(50)).await;
        Ok::<f64, anyhow::Error>(target_match(&s, TARGET))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = EvolutionConfig {
        population_size: 100,
        max_generations: 100,
        elitism_count: 10,
        seed: Some(7),
        ..Default::default()
    };

    let ga = GeneticAlgorithm::new(config);
    let (tx, rx) = unbounded();
    let ga = ga.with_observer(tx);

    let seed = TARGET.replace("input", "inp").replace("trim", "tirm");
    let fitness = latency_fitness();

    let start = Instant::now();
    let result = ga.evolve(&[seed], &[], &fitness).await?;
    let duration = start.elapsed();
    drop(ga);

    let generations = rx
        .iter()
        .filter(|e| matches!(e, EvolutionEvent::GenerationUpdate(_)))
        .count();

    println!("GA took: {:?} over {} generations", duration, generations);
    println!("best fitness {:.4}: {}", result.fitness, result.solution);
    Ok(())
}
