use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::domain::DEFAULT_ALPHABET;

/// The four point mutations. One is drawn uniformly per mutation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Replace,
    Insert,
    Delete,
    Swap,
}

impl MutationKind {
    pub const ALL: [MutationKind; 4] = [
        MutationKind::Replace,
        MutationKind::Insert,
        MutationKind::Delete,
        MutationKind::Swap,
    ];
}

/// Character-level mutation operator over a fixed alphabet.
#[derive(Clone, Debug)]
pub struct Mutator {
    alphabet: Vec<char>,
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHABET)
    }
}

impl Mutator {
    /// An empty alphabet falls back to the default printable set.
    pub fn new(alphabet: &str) -> Self {
        let mut chars: Vec<char> = alphabet.chars().collect();
        if chars.is_empty() {
            chars = DEFAULT_ALPHABET.chars().collect();
        }
        Self { alphabet: chars }
    }

    /// Applies one uniformly chosen mutation at one random position.
    pub fn apply(&self, encoding: &str, rng: &mut impl Rng) -> String {
        let kind = *MutationKind::ALL
            .choose(rng)
            .unwrap_or(&MutationKind::Insert);
        self.apply_kind(kind, encoding, rng)
    }

    /// Applies `kind`, or an insert when `kind` cannot act on a string this
    /// short (nothing to replace/delete, fewer than two chars to swap).
    pub fn apply_kind(&self, kind: MutationKind, encoding: &str, rng: &mut impl Rng) -> String {
        let mut chars: Vec<char> = encoding.chars().collect();
        let n = chars.len();

        let kind = match kind {
            MutationKind::Replace | MutationKind::Delete if n == 0 => MutationKind::Insert,
            MutationKind::Swap if n < 2 => MutationKind::Insert,
            k => k,
        };

        match kind {
            MutationKind::Replace => {
                let i = rng.gen_range(0..n);
                chars[i] = self.random_char(rng);
            }
            MutationKind::Insert => {
                let i = rng.gen_range(0..=n);
                chars.insert(i, self.random_char(rng));
            }
            MutationKind::Delete => {
                let i = rng.gen_range(0..n);
                chars.remove(i);
            }
            MutationKind::Swap => {
                let i = rng.gen_range(0..n - 1);
                chars.swap(i, i + 1);
            }
        }

        chars.into_iter().collect()
    }

    fn random_char(&self, rng: &mut impl Rng) -> char {
        self.alphabet[rng.gen_range(0..self.alphabet.len())]
    }
}

// --- Crossover ---

/// Single-point crossover: head of `p1`, tail of `p2`.
///
/// The cut point is drawn from `0..=min(len(p1), len(p2))` (in characters).
pub fn crossover_single_point(p1: &str, p2: &str, rng: &mut impl Rng) -> String {
    let a: Vec<char> = p1.chars().collect();
    let b: Vec<char> = p2.chars().collect();
    let cut = rng.gen_range(0..=a.len().min(b.len()));

    a[..cut].iter().chain(b[cut..].iter()).collect()
}
