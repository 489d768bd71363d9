use std::collections::HashSet;

use crossbeam_channel::Sender;
use log::{debug, info};
use rand::prelude::*;

use crate::core::constraints::{self, Constraint};
use crate::core::domain::{
    EvolutionConfig, EvolutionResult, Individual, SelectionMethod, ACCEPTANCE_THRESHOLD,
};
use crate::engine::evaluator::{score, FitnessFunction};
use crate::engine::operators::{crossover_single_point, Mutator};
use crate::error::{RepairError, Result};
use crate::solvers::{EvolutionEvent, GenStats};

pub struct GeneticAlgorithm {
    config: EvolutionConfig,
    mutator: Mutator,
    observer: Option<Sender<EvolutionEvent>>,
}

impl GeneticAlgorithm {
    pub fn new(config: EvolutionConfig) -> Self {
        let mutator = Mutator::new(&config.alphabet);
        Self {
            config,
            mutator,
            observer: None,
        }
    }

    /// Streams per-generation events to `tx`. Send failures are ignored.
    pub fn with_observer(mut self, tx: Sender<EvolutionEvent>) -> Self {
        self.observer = Some(tx);
        self
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Runs the generation loop from `seeds`.
    ///
    /// Stops at the first generation whose best individual reaches
    /// [`ACCEPTANCE_THRESHOLD`], or after `max_generations` reproduction
    /// steps. The returned generation is therefore never above
    /// `max_generations`. With `elitism_count >= 1` and satisfiable
    /// constraints the best fitness never decreases between generations.
    pub async fn evolve(
        &self,
        seeds: &[String],
        constraints: &[Constraint],
        fitness: &dyn FitnessFunction,
    ) -> Result<EvolutionResult> {
        self.config.validate()?;
        if seeds.is_empty() {
            return Err(RepairError::Configuration(
                "at least one seed candidate is required".into(),
            ));
        }

        let mut rng = self.config.rng();
        debug!(
            "evolving {} seeds with '{}' (pop={}, max_gen={})",
            seeds.len(),
            fitness.name(),
            self.config.population_size,
            self.config.max_generations
        );

        // 1. Initialization Phase
        let mut population = self.initial_population(seeds, fitness, &mut rng).await;
        let mut best_so_far = f64::NEG_INFINITY;
        let mut generation = 0;

        // 2. Evolution Loop
        loop {
            // A. Constraint filtering (never collapses to empty)
            let (mut pool, valid_count) = constraints::filter_with_fallback(&population, constraints);
            if valid_count == 0 && !constraints.is_empty() {
                debug!("generation {generation}: no individual satisfies the constraints, using unfiltered population");
            }
            rank_population(&mut pool);

            // B. Telemetry
            let stats = measure(generation, &pool, valid_count, population.len());
            self.emit(EvolutionEvent::GenerationUpdate(stats));

            let best = pool[0].clone();
            if best.fitness > best_so_far {
                best_so_far = best.fitness;
                self.emit(EvolutionEvent::NewBest(best.clone()));
            }

            // C. Convergence
            if best.fitness >= ACCEPTANCE_THRESHOLD {
                info!(
                    "accepted solution at generation {} (fitness {:.4})",
                    generation, best.fitness
                );
                return Ok(self.finish(best, generation));
            }
            if generation >= self.config.max_generations {
                info!(
                    "generation budget exhausted at {} (best fitness {:.4})",
                    generation, best.fitness
                );
                return Ok(self.finish(best, generation));
            }

            // D. Reproduction
            population = self.next_generation(&pool, fitness, &mut rng).await;
            generation += 1;
        }
    }

    // --- Helpers ---

    async fn initial_population(
        &self,
        seeds: &[String],
        fitness: &dyn FitnessFunction,
        rng: &mut impl Rng,
    ) -> Vec<Individual> {
        let target = self.config.population_size;
        let mut pop = Vec::with_capacity(target.max(seeds.len()));

        for seed in seeds {
            let f = score(fitness, seed).await;
            pop.push(Individual::new(seed.clone(), f));
        }

        while pop.len() < target {
            let parent = &seeds[rng.gen_range(0..seeds.len())];
            let encoding = self.mutator.apply(parent, rng);
            let f = score(fitness, &encoding).await;
            pop.push(Individual::new(encoding, f));
        }

        // Surplus seeds: keep the fittest so the size invariant holds.
        if pop.len() > target {
            rank_population(&mut pop);
            pop.truncate(target);
        }
        pop
    }

    /// `pool` must be ranked best-first and non-empty.
    async fn next_generation(
        &self,
        pool: &[Individual],
        fitness: &dyn FitnessFunction,
        rng: &mut impl Rng,
    ) -> Vec<Individual> {
        let target = self.config.population_size;
        let mut next_gen = Vec::with_capacity(target);

        // A. Elitism
        next_gen.extend(pool.iter().take(self.config.elitism_count).cloned());

        // B. Breeding
        while next_gen.len() < target {
            let p1 = self.select(pool, rng);
            let p2 = self.select(pool, rng);

            let (mut encoding, mut inherited) = if rng.gen::<f64>() < self.config.crossover_rate {
                (crossover_single_point(&p1.encoding, &p2.encoding, rng), None)
            } else {
                let parent = if rng.gen_bool(0.5) { p1 } else { p2 };
                (parent.encoding.clone(), Some(parent.fitness))
            };

            if rng.gen::<f64>() < self.config.mutation_rate {
                encoding = self.mutator.apply(&encoding, rng);
                inherited = None;
            }

            // Unchanged clones keep their parent's score.
            let f = match inherited {
                Some(f) => f,
                None => score(fitness, &encoding).await,
            };
            next_gen.push(Individual::new(encoding, f));
        }

        next_gen
    }

    fn select<'a>(&self, pool: &'a [Individual], rng: &mut impl Rng) -> &'a Individual {
        match self.config.selection_method {
            SelectionMethod::Tournament => tournament_select(pool, self.config.tournament_size, rng),
            SelectionMethod::Roulette => roulette_select(pool, rng),
        }
    }

    fn finish(&self, best: Individual, generation: usize) -> EvolutionResult {
        let result = EvolutionResult {
            solution: best.encoding,
            fitness: best.fitness,
            generation,
        };
        self.emit(EvolutionEvent::Finished(result.clone()));
        result
    }

    fn emit(&self, event: EvolutionEvent) {
        if let Some(tx) = &self.observer {
            let _ = tx.send(event);
        }
    }
}

// --- Selection ---

/// Samples `size` individuals uniformly (with replacement) and keeps the fittest.
pub fn tournament_select<'a>(
    pool: &'a [Individual],
    size: usize,
    rng: &mut impl Rng,
) -> &'a Individual {
    let mut best = &pool[rng.gen_range(0..pool.len())];
    for _ in 1..size {
        let candidate = &pool[rng.gen_range(0..pool.len())];
        if candidate.fitness > best.fitness {
            best = candidate;
        }
    }
    best
}

/// Fitness-proportionate selection.
///
/// Negative fitness counts as zero. Falls back to a uniform pick when the
/// total is zero or when float drift lets the scan run off the end.
pub fn roulette_select<'a>(pool: &'a [Individual], rng: &mut impl Rng) -> &'a Individual {
    let total: f64 = pool.iter().map(|ind| ind.fitness.max(0.0)).sum();
    if total > 0.0 {
        let mut remaining = rng.gen::<f64>() * total;
        for ind in pool {
            remaining -= ind.fitness.max(0.0);
            if remaining <= 0.0 {
                return ind;
            }
        }
    }
    pool.choose(rng).unwrap_or(&pool[0])
}

/// Best first. Stable, so ties keep their order.
pub fn rank_population(pop: &mut [Individual]) {
    pop.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
}

fn measure(generation: usize, ranked: &[Individual], valid_count: usize, pop_size: usize) -> GenStats {
    let n = ranked.len();
    let best = ranked.first().map(|i| i.fitness).unwrap_or(0.0);
    let worst = ranked.last().map(|i| i.fitness).unwrap_or(0.0);
    let sum: f64 = ranked.iter().map(|i| i.fitness).sum();
    let unique: HashSet<&str> = ranked.iter().map(|i| i.encoding.as_str()).collect();

    GenStats {
        generation,
        best_fitness: best,
        average_fitness: if n > 0 { sum / n as f64 } else { 0.0 },
        worst_fitness: worst,
        diversity: if n > 0 { unique.len() as f64 / n as f64 } else { 0.0 },
        valid_count,
        pop_size,
    }
}
