use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::constraints::Constraint;
use crate::core::domain::{EvolutionResult, Individual, ScoredSolution};
use crate::error::Result;

/// Detailed statistics for a single generation.
/// Used for telemetry, progress messages and the CSV history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub average_fitness: f64,
    pub worst_fitness: f64,
    pub diversity: f64,     // 0.0 to 1.0 (Unique Encodings / Population Size)
    pub valid_count: usize, // Individuals satisfying every constraint (0 = fallback)
    pub pop_size: usize,    // Full population size before filtering
}

impl Default for GenStats {
    fn default() -> Self {
        Self {
            generation: 0,
            best_fitness: 0.0,
            average_fitness: 0.0,
            worst_fitness: 0.0,
            diversity: 0.0,
            valid_count: 0,
            pop_size: 0,
        }
    }
}

/// Events emitted by solvers to an optional observer.
#[derive(Debug, Clone)]
pub enum EvolutionEvent {
    /// A completed generation with full statistics.
    GenerationUpdate(GenStats),

    /// An individual that beats the run's previous best.
    NewBest(Individual),

    /// A hybrid round finished (round numbers start at 1).
    RoundCompleted { round: u32, result: EvolutionResult },

    /// The run has finished.
    Finished(EvolutionResult),
}

/// The operation surface shared by the in-process engine and the bridge.
///
/// Fitness functions are referenced by registry name so that the same call
/// can be served locally or by a worker process.
#[async_trait]
pub trait RepairEngine: Send + Sync {
    async fn evolve(
        &self,
        candidates: Vec<String>,
        constraints: Vec<Constraint>,
        fitness: &str,
        rounds: u32,
    ) -> Result<EvolutionResult>;

    async fn refine(&self, solution: String, constraints: Vec<Constraint>) -> Result<EvolutionResult>;

    async fn evaluate(&self, solutions: Vec<String>, fitness: &str) -> Result<Vec<ScoredSolution>>;
}

pub mod ga;
pub mod local;
