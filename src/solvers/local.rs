use std::sync::Arc;

use async_trait::async_trait;
use crossbeam_channel::Sender;
use log::info;

use crate::core::constraints::{self, Constraint};
use crate::core::domain::{EvolutionConfig, EvolutionResult, ScoredSolution};
use crate::engine::evaluator::{score, Heuristic};
use crate::engine::registry::FitnessRegistry;
use crate::error::{RepairError, Result};
use crate::solvers::ga::GeneticAlgorithm;
use crate::solvers::{EvolutionEvent, RepairEngine};

/// Seed sets smaller than this get topped up with original candidates.
const MIN_ROUND_SEEDS: usize = 5;
const MAX_RESEEDED_ORIGINALS: usize = 3;

/// In-process implementation of [`RepairEngine`].
///
/// Cheap to clone: the registry is shared.
#[derive(Clone)]
pub struct LocalEngine {
    registry: Arc<FitnessRegistry>,
    config: EvolutionConfig,
    observer: Option<Sender<EvolutionEvent>>,
}

impl LocalEngine {
    pub fn new(registry: Arc<FitnessRegistry>, config: EvolutionConfig) -> Self {
        Self {
            registry,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, tx: Sender<EvolutionEvent>) -> Self {
        self.observer = Some(tx);
        self
    }

    /// Same registry and observer, different run parameters.
    pub fn with_config(mut self, config: EvolutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<FitnessRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    fn solver(&self) -> GeneticAlgorithm {
        let ga = GeneticAlgorithm::new(self.config.clone());
        match &self.observer {
            Some(tx) => ga.with_observer(tx.clone()),
            None => ga,
        }
    }

    fn emit(&self, event: EvolutionEvent) {
        if let Some(tx) = &self.observer {
            let _ = tx.send(event);
        }
    }

    async fn refine_with(
        &self,
        solver: &GeneticAlgorithm,
        solution: &str,
        constraints: &[Constraint],
    ) -> Result<EvolutionResult> {
        let repaired = constraints::repair(solution, constraints);
        let mut seeds = vec![repaired];
        if seeds[0] != solution {
            seeds.push(solution.to_string());
        }

        let rules = constraints.to_vec();
        let satisfaction = Heuristic::new("constraint_satisfaction", move |s| {
            constraints::satisfaction_ratio(s, &rules)
        });

        solver.evolve(&seeds, constraints, &satisfaction).await
    }
}

#[async_trait]
impl RepairEngine for LocalEngine {
    /// Runs `rounds` evolve-then-refine rounds, then one final evolution over
    /// the last seed set.
    async fn evolve(
        &self,
        candidates: Vec<String>,
        constraints: Vec<Constraint>,
        fitness: &str,
        rounds: u32,
    ) -> Result<EvolutionResult> {
        if candidates.is_empty() {
            return Err(RepairError::Configuration(
                "at least one candidate is required".into(),
            ));
        }
        let fitness_fn = self.registry.resolve(fitness)?;
        let solver = self.solver();
        let mut current = candidates.clone();

        for round in 1..=rounds {
            info!("hybrid round {}/{} with {} candidates", round, rounds, current.len());
            let evolved = solver.evolve(&current, &constraints, fitness_fn.as_ref()).await?;
            // Intermediate repairs stay off the observer stream.
            let refined = self
                .refine_with(&GeneticAlgorithm::new(self.config.clone()), &evolved.solution, &constraints)
                .await?;

            current = vec![refined.solution.clone()];
            if evolved.solution != refined.solution {
                current.push(evolved.solution.clone());
            }
            if current.len() < MIN_ROUND_SEEDS {
                let extra = MAX_RESEEDED_ORIGINALS.min(candidates.len());
                current.extend((0..extra).map(|i| candidates[i % candidates.len()].clone()));
            }

            self.emit(EvolutionEvent::RoundCompleted {
                round,
                result: evolved,
            });
        }

        solver.evolve(&current, &constraints, fitness_fn.as_ref()).await
    }

    /// Repairs `solution` toward its constraints, scored by the share of
    /// constraints satisfied.
    async fn refine(&self, solution: String, constraints: Vec<Constraint>) -> Result<EvolutionResult> {
        self.refine_with(&self.solver(), &solution, &constraints).await
    }

    async fn evaluate(&self, solutions: Vec<String>, fitness: &str) -> Result<Vec<ScoredSolution>> {
        let fitness_fn = self.registry.resolve(fitness)?;
        let mut scored = Vec::with_capacity(solutions.len());
        for solution in solutions {
            let f = score(fitness_fn.as_ref(), &solution).await;
            scored.push(ScoredSolution {
                solution,
                fitness: f,
            });
        }
        Ok(scored)
    }
}
