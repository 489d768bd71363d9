use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;

use crate::engine::evaluator::{FitnessFunction, Heuristic};
use crate::error::{RepairError, Result};

/// Named fitness functions.
///
/// Functions cannot cross the process boundary, so both sides of the bridge
/// resolve the same name against their own registry. Besides exact names,
/// two parameterised forms are understood: `char_ratio:<c>` and
/// `target:<text>`.
pub struct FitnessRegistry {
    entries: RwLock<BTreeMap<String, Arc<dyn FitnessFunction>>>,
}

impl Default for FitnessRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FitnessRegistry {
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        let quality: Arc<dyn FitnessFunction> =
            Arc::new(Heuristic::new("code_quality", code_quality()));
        registry.register_as("code_quality", quality.clone());
        registry.register_as("default", quality);
        registry
    }

    /// Registers under the function's own name, replacing any previous entry.
    pub fn register(&self, function: Arc<dyn FitnessFunction>) {
        let name = function.name().to_string();
        self.register_as(&name, function);
    }

    pub fn register_as(&self, name: &str, function: Arc<dyn FitnessFunction>) {
        self.entries.write().insert(name.to_string(), function);
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn FitnessFunction>> {
        if let Some(f) = self.entries.read().get(reference) {
            return Ok(f.clone());
        }

        if let Some(arg) = reference.strip_prefix("char_ratio:") {
            let mut chars = arg.chars();
            if let (Some(target), None) = (chars.next(), chars.next()) {
                return Ok(Arc::new(Heuristic::new(reference, move |s| {
                    char_ratio(s, target)
                })));
            }
        }

        if let Some(target) = reference.strip_prefix("target:") {
            let target = target.to_string();
            return Ok(Arc::new(Heuristic::new(reference, move |s| {
                target_match(s, &target)
            })));
        }

        Err(RepairError::UnknownFitness(reference.to_string()))
    }
}

// --- Built-in scoring rules ---

/// Share of characters equal to `target`. Empty strings score 0.
pub fn char_ratio(encoding: &str, target: char) -> f64 {
    let total = encoding.chars().count();
    if total == 0 {
        return 0.0;
    }
    encoding.chars().filter(|&c| c == target).count() as f64 / total as f64
}

/// Position-wise agreement with `target`, normalised by the longer length.
pub fn target_match(encoding: &str, target: &str) -> f64 {
    let longest = encoding.chars().count().max(target.chars().count());
    if longest == 0 {
        return 1.0;
    }
    let hits = encoding
        .chars()
        .zip(target.chars())
        .filter(|(a, b)| a == b)
        .count();
    hits as f64 / longest as f64
}

static RE_MODULAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(function|class|fn|def)\b").unwrap());
static RE_ERROR_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error|exception").unwrap());

/// Rewards length (up to 0.5) and a handful of code-quality markers (0.1 each).
fn code_quality() -> impl Fn(&str) -> f64 + Send + Sync + 'static {
    |s: &str| {
        let length_score = (s.chars().count() as f64 / 1000.0).min(0.5);
        let mut quality = 0.0;

        if s.contains("try") && s.contains("catch") {
            quality += 0.1;
        }
        if s.contains("/**") || s.contains("//") {
            quality += 0.1;
        }
        if RE_MODULAR.is_match(s) {
            quality += 0.1;
        }
        if s.contains("if") && RE_ERROR_WORD.is_match(s) {
            quality += 0.1;
        }
        if s.contains("return") {
            quality += 0.1;
        }

        length_score + quality
    }
}
