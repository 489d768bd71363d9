use std::sync::Arc;

use crossbeam_channel::unbounded;
use genetic_repair::core::constraints::{satisfies_all, Constraint};
use genetic_repair::core::domain::{EvolutionConfig, SelectionMethod};
use genetic_repair::engine::registry::FitnessRegistry;
use genetic_repair::solvers::ga::GeneticAlgorithm;
use genetic_repair::solvers::local::LocalEngine;
use genetic_repair::solvers::{EvolutionEvent, GenStats, RepairEngine};
use genetic_repair::RepairError;

use crate::common::{quick_config, AlwaysFails, MockRatio, PanicsWhenPolled};

mod common;

fn generation_stats(events: impl IntoIterator<Item = EvolutionEvent>) -> Vec<GenStats> {
    events
        .into_iter()
        .filter_map(|e| match e {
            EvolutionEvent::GenerationUpdate(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn seeds(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_ga_flow() {
    let (tx, rx) = unbounded();
    let ga = GeneticAlgorithm::new(quick_config(1)).with_observer(tx);

    let result = ga.evolve(&seeds(&["abcd"]), &[], &MockRatio('z')).await.unwrap();
    drop(ga);

    let mut finished = false;
    let mut received_stats = false;
    for msg in rx {
        match msg {
            EvolutionEvent::Finished(r) => {
                assert_eq!(r, result);
                finished = true;
            }
            EvolutionEvent::GenerationUpdate(_) => received_stats = true,
            _ => {}
        }
    }

    assert!(finished, "GA did not finish");
    assert!(received_stats, "GA did not send stats");
    assert!(result.generation <= 10);
}

#[tokio::test]
async fn test_population_size_is_constant() {
    for seed_set in [seeds(&["ab"]), seeds(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"])] {
        let (tx, rx) = unbounded();
        let ga = GeneticAlgorithm::new(quick_config(2)).with_observer(tx);
        ga.evolve(&seed_set, &[], &MockRatio('z')).await.unwrap();
        drop(ga);

        let stats = generation_stats(rx);
        assert!(!stats.is_empty());
        assert!(stats.iter().all(|s| s.pop_size == 8), "{stats:?}");
    }
}

#[tokio::test]
async fn test_elitism_keeps_best_fitness_monotone() {
    let config = EvolutionConfig {
        max_generations: 30,
        elitism_count: 1,
        ..quick_config(3)
    };
    let (tx, rx) = unbounded();
    let ga = GeneticAlgorithm::new(config).with_observer(tx);
    ga.evolve(&seeds(&["abcdef"]), &[], &MockRatio('z')).await.unwrap();
    drop(ga);

    let stats = generation_stats(rx);
    for pair in stats.windows(2) {
        assert!(
            pair[1].best_fitness >= pair[0].best_fitness,
            "best fitness dropped: {:?} -> {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn test_stops_at_first_acceptable_generation() {
    // The example run: an already perfect seed is accepted immediately
    let config = EvolutionConfig {
        population_size: 4,
        max_generations: 10,
        seed: Some(4),
        ..Default::default()
    };
    let (tx, rx) = unbounded();
    let ga = GeneticAlgorithm::new(config).with_observer(tx);
    let result = ga
        .evolve(&seeds(&["aaaa"]), &[Constraint::MinLength(4)], &MockRatio('a'))
        .await
        .unwrap();
    drop(ga);

    assert_eq!(result.solution, "aaaa");
    assert_eq!(result.fitness, 1.0);
    assert_eq!(result.generation, 0);
    assert_eq!(generation_stats(rx).len(), 1);
}

#[tokio::test]
async fn test_failing_fitness_still_terminates() {
    let ga = GeneticAlgorithm::new(quick_config(5));
    let result = ga.evolve(&seeds(&["abc"]), &[], &AlwaysFails).await.unwrap();
    assert_eq!(result.fitness, 0.0);
    assert_eq!(result.generation, 10);

    let result = ga.evolve(&seeds(&["abc"]), &[], &PanicsWhenPolled).await.unwrap();
    assert_eq!(result.fitness, 0.0);
    assert_eq!(result.generation, 10);
}

#[tokio::test]
async fn test_unsatisfiable_constraints_fall_back() {
    let config = EvolutionConfig {
        alphabet: "ab".into(),
        ..quick_config(6)
    };
    let (tx, rx) = unbounded();
    let ga = GeneticAlgorithm::new(config).with_observer(tx);
    let result = ga
        .evolve(&seeds(&["abab"]), &[Constraint::MustContain("z".into())], &MockRatio('a'))
        .await
        .unwrap();
    drop(ga);

    assert!(!result.solution.contains('z'));
    let stats = generation_stats(rx);
    assert!(stats.iter().all(|s| s.valid_count == 0));
}

#[tokio::test]
async fn test_seeded_runs_are_reproducible() {
    let run = || async {
        GeneticAlgorithm::new(quick_config(42))
            .evolve(&seeds(&["hello"]), &[], &MockRatio('l'))
            .await
            .unwrap()
    };
    assert_eq!(run().await, run().await);
}

#[tokio::test]
async fn test_roulette_run() {
    let config = EvolutionConfig {
        selection_method: SelectionMethod::Roulette,
        max_generations: 20,
        ..quick_config(8)
    };
    let result = GeneticAlgorithm::new(config)
        .evolve(&seeds(&["abba"]), &[], &MockRatio('a'))
        .await
        .unwrap();
    assert!(result.fitness >= 0.5);
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let ga = GeneticAlgorithm::new(quick_config(9));
    assert!(matches!(
        ga.evolve(&[], &[], &MockRatio('a')).await,
        Err(RepairError::Configuration(_))
    ));

    let ga = GeneticAlgorithm::new(EvolutionConfig {
        population_size: 0,
        ..Default::default()
    });
    assert!(matches!(
        ga.evolve(&seeds(&["a"]), &[], &MockRatio('a')).await,
        Err(RepairError::Configuration(_))
    ));
}

// --- Local engine ---

fn engine(seed: u64) -> LocalEngine {
    LocalEngine::new(Arc::new(FitnessRegistry::with_builtins()), quick_config(seed))
}

#[tokio::test]
async fn test_engine_evolve_rounds() {
    let (tx, rx) = unbounded();
    let engine = engine(10).with_observer(tx);

    let result = engine
        .evolve(seeds(&["aaaa", "bbbb"]), vec![], "char_ratio:a", 2)
        .await
        .unwrap();
    drop(engine);

    assert_eq!(result.fitness, 1.0);
    let rounds: Vec<u32> = rx
        .into_iter()
        .filter_map(|e| match e {
            EvolutionEvent::RoundCompleted { round, .. } => Some(round),
            _ => None,
        })
        .collect();
    assert_eq!(rounds, vec![1, 2]);
}

#[tokio::test]
async fn test_engine_rejects_bad_requests() {
    let engine = engine(11);
    assert!(matches!(
        engine.evolve(vec![], vec![], "default", 0).await,
        Err(RepairError::Configuration(_))
    ));
    assert!(matches!(
        engine.evolve(seeds(&["a"]), vec![], "no_such_function", 0).await,
        Err(RepairError::UnknownFitness(_))
    ));
    assert!(matches!(
        engine.evaluate(seeds(&["a"]), "no_such_function").await,
        Err(RepairError::UnknownFitness(_))
    ));
}

#[tokio::test]
async fn test_engine_refine() {
    let constraints = vec![
        Constraint::MustNotContain("world".into()),
        Constraint::MustContain("fn".into()),
        Constraint::MinLength(8),
    ];
    let result = engine(12)
        .refine("hello world".into(), constraints.clone())
        .await
        .unwrap();

    assert_eq!(result.solution, "hello fn");
    assert_eq!(result.fitness, 1.0);
    assert!(satisfies_all(&result.solution, &constraints));
}

#[tokio::test]
async fn test_engine_evaluate_preserves_order() {
    let scored = engine(13)
        .evaluate(seeds(&["aa", "ab", ""]), "char_ratio:a")
        .await
        .unwrap();

    let fitness: Vec<f64> = scored.iter().map(|s| s.fitness).collect();
    assert_eq!(fitness, vec![1.0, 0.5, 0.0]);
    assert_eq!(scored[1].solution, "ab");
}
