use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{RepairError, Result};

// --- Constants ---

/// Fixed acceptance bar: a run stops as soon as its best individual reaches it.
pub const ACCEPTANCE_THRESHOLD: f64 = 0.95;

/// Printable ASCII, used by replace/insert mutations unless overridden.
pub const DEFAULT_ALPHABET: &str =
    " !\"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}~";

// --- The Core Entity ---

/// One candidate solution and its score.
///
/// Individuals are never edited after scoring; operators always build a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub encoding: String,
    pub fitness: f64,
}

impl Individual {
    pub fn new(encoding: impl Into<String>, fitness: f64) -> Self {
        Self {
            encoding: encoding.into(),
            fitness,
        }
    }
}

/// Output of a run: the best encoding and the generation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionResult {
    pub solution: String,
    pub fitness: f64,
    pub generation: usize,
}

/// One entry of an `evaluate` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSolution {
    pub solution: String,
    pub fitness: f64,
}

// --- Configuration Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    Tournament,
    Roulette,
}

impl Default for SelectionMethod {
    fn default() -> Self {
        SelectionMethod::Tournament
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elitism_count: usize,
    pub selection_method: SelectionMethod,
    pub tournament_size: usize,
    pub max_generations: usize,

    /// Fixes the RNG stream; `None` draws a fresh seed per run.
    pub seed: Option<u64>,
    /// Characters available to replace/insert mutations.
    pub alphabet: String,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 20,
            mutation_rate: 0.1,
            crossover_rate: 0.7,
            elitism_count: 2,
            selection_method: SelectionMethod::Tournament,
            tournament_size: 3,
            max_generations: 50,
            seed: None,
            alphabet: DEFAULT_ALPHABET.to_string(),
        }
    }
}

impl EvolutionConfig {
    /// Loads a (possibly partial) config from a JSON file; missing keys keep defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            return Err(RepairError::Configuration(
                "population_size must be at least 1".into(),
            ));
        }
        if self.tournament_size == 0 {
            return Err(RepairError::Configuration(
                "tournament_size must be at least 1".into(),
            ));
        }
        if self.elitism_count > self.population_size {
            return Err(RepairError::Configuration(format!(
                "elitism_count ({}) exceeds population_size ({})",
                self.elitism_count, self.population_size
            )));
        }
        for (name, rate) in [
            ("mutation_rate", self.mutation_rate),
            ("crossover_rate", self.crossover_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(RepairError::Configuration(format!(
                    "{name} must lie in [0, 1], got {rate}"
                )));
            }
        }
        if self.alphabet.is_empty() {
            return Err(RepairError::Configuration("alphabet must not be empty".into()));
        }
        Ok(())
    }

    /// The run's random stream. Seeded runs are reproducible.
    pub fn rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::random()),
        }
    }
}
