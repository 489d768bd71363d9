use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::domain::Individual;

/// A pure predicate over an encoding.
///
/// On the wire: `{ "type": "must_contain", "value": "return" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Constraint {
    MustContain(String),
    MustNotContain(String),
    MinLength(usize),
    MaxLength(usize),
}

impl Constraint {
    /// Lengths are counted in characters, not bytes.
    pub fn is_satisfied_by(&self, encoding: &str) -> bool {
        match self {
            Constraint::MustContain(s) => encoding.contains(s.as_str()),
            Constraint::MustNotContain(s) => s.is_empty() || !encoding.contains(s.as_str()),
            Constraint::MinLength(n) => encoding.chars().count() >= *n,
            Constraint::MaxLength(n) => encoding.chars().count() <= *n,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::MustContain(s) => write!(f, "must_contain={s}"),
            Constraint::MustNotContain(s) => write!(f, "must_not_contain={s}"),
            Constraint::MinLength(n) => write!(f, "min_length={n}"),
            Constraint::MaxLength(n) => write!(f, "max_length={n}"),
        }
    }
}

/// Parses the CLI form `kind=value`, e.g. `min_length=4`.
impl FromStr for Constraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected kind=value, got '{s}'"))?;
        let length = || {
            value
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid length '{value}': {e}"))
        };
        match kind.trim() {
            "must_contain" => Ok(Constraint::MustContain(value.to_string())),
            "must_not_contain" => Ok(Constraint::MustNotContain(value.to_string())),
            "min_length" => Ok(Constraint::MinLength(length()?)),
            "max_length" => Ok(Constraint::MaxLength(length()?)),
            other => Err(format!("unknown constraint kind '{other}'")),
        }
    }
}

pub fn satisfies_all(encoding: &str, constraints: &[Constraint]) -> bool {
    constraints.iter().all(|c| c.is_satisfied_by(encoding))
}

/// Fraction of constraints the encoding satisfies; 1.0 when there are none.
pub fn satisfaction_ratio(encoding: &str, constraints: &[Constraint]) -> f64 {
    if constraints.is_empty() {
        return 1.0;
    }
    let met = constraints.iter().filter(|c| c.is_satisfied_by(encoding)).count();
    met as f64 / constraints.len() as f64
}

/// Keeps the individuals that satisfy every constraint.
///
/// Returns the surviving set and how many satisfied the constraints. When
/// nobody does, the unfiltered population comes back with a count of 0; the
/// result is never empty for a non-empty input.
pub fn filter_with_fallback(
    population: &[Individual],
    constraints: &[Constraint],
) -> (Vec<Individual>, usize) {
    let valid: Vec<Individual> = population
        .iter()
        .filter(|ind| satisfies_all(&ind.encoding, constraints))
        .cloned()
        .collect();

    if valid.is_empty() {
        (population.to_vec(), 0)
    } else {
        let count = valid.len();
        (valid, count)
    }
}

/// Deterministic best-effort repair toward the constraints.
///
/// Forbidden substrings are stripped, missing required ones appended, then
/// the result is truncated/padded to the length bounds. Conflicting
/// constraints can leave some unsatisfied.
pub fn repair(encoding: &str, constraints: &[Constraint]) -> String {
    let mut out = encoding.to_string();

    for c in constraints {
        if let Constraint::MustNotContain(s) = c {
            // Each pass shortens the string, so this terminates.
            while !s.is_empty() && out.contains(s.as_str()) {
                out = out.replace(s.as_str(), "");
            }
        }
    }

    for c in constraints {
        if let Constraint::MustContain(s) = c {
            if !out.contains(s.as_str()) {
                if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
                out.push_str(s);
            }
        }
    }

    for c in constraints {
        match c {
            Constraint::MaxLength(n) if out.chars().count() > *n => {
                out = out.chars().take(*n).collect();
            }
            Constraint::MinLength(n) => {
                let len = out.chars().count();
                if len < *n {
                    out.extend(std::iter::repeat(' ').take(n - len));
                }
            }
            _ => {}
        }
    }

    out
}
