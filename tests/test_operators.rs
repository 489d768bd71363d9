use genetic_repair::core::domain::Individual;
use genetic_repair::engine::operators::{crossover_single_point, MutationKind, Mutator};
use genetic_repair::solvers::ga::{rank_population, roulette_select, tournament_select};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(7)
}

#[test]
fn test_mutation_replace() {
    let mut rng = rng();
    for _ in 0..50 {
        let mutated = Mutator::new("x").apply_kind(MutationKind::Replace, "abc", &mut rng);
        assert_eq!(mutated.chars().count(), 3);
        assert_eq!(mutated.matches('x').count(), 1);
    }
}

#[test]
fn test_mutation_insert_and_delete() {
    let mut rng = rng();
    let mutator = Mutator::new("x");

    let grown = mutator.apply_kind(MutationKind::Insert, "abc", &mut rng);
    assert_eq!(grown.chars().count(), 4);
    assert_eq!(grown.matches('x').count(), 1);

    let shrunk = mutator.apply_kind(MutationKind::Delete, "abc", &mut rng);
    assert_eq!(shrunk.chars().count(), 2);
}

#[test]
fn test_mutation_swap_adjacent() {
    let mut rng = rng();
    // Only one adjacent pair exists
    let swapped = Mutator::default().apply_kind(MutationKind::Swap, "ab", &mut rng);
    assert_eq!(swapped, "ba");

    for _ in 0..20 {
        let s = Mutator::default().apply_kind(MutationKind::Swap, "abcd", &mut rng);
        let mut sorted: Vec<char> = s.chars().collect();
        sorted.sort();
        assert_eq!(sorted, vec!['a', 'b', 'c', 'd']);
        assert_ne!(s, "abcd");
    }
}

#[test]
fn test_mutation_on_short_strings_inserts() {
    let mut rng = rng();
    let mutator = Mutator::new("x");

    assert_eq!(mutator.apply_kind(MutationKind::Delete, "", &mut rng), "x");
    assert_eq!(mutator.apply_kind(MutationKind::Replace, "", &mut rng), "x");
    assert_eq!(mutator.apply_kind(MutationKind::Swap, "a", &mut rng).chars().count(), 2);

    for _ in 0..20 {
        // Every kind yields something from an empty encoding
        assert!(!mutator.apply("", &mut rng).is_empty());
    }
}

#[test]
fn test_mutation_handles_multibyte_chars() {
    let mut rng = rng();
    let mutator = Mutator::new("é");
    for kind in MutationKind::ALL {
        let out = mutator.apply_kind(kind, "日本語", &mut rng);
        let n = out.chars().count();
        assert!((2..=4).contains(&n), "{kind:?} produced {out:?}");
    }
}

#[test]
fn test_crossover() {
    let mut rng = rng();
    for _ in 0..50 {
        let child = crossover_single_point("aaaa", "bbbbbb", &mut rng);

        // Head of p1, tail of p2
        assert_eq!(child.chars().count(), 6);
        let heads = child.chars().take_while(|&c| c == 'a').count();
        assert!(child.chars().skip(heads).all(|c| c == 'b'), "got {child}");
        assert!(heads <= 4);
    }
}

#[test]
fn test_crossover_with_empty_parent() {
    let mut rng = rng();
    assert_eq!(crossover_single_point("", "xyz", &mut rng), "xyz");
    assert_eq!(crossover_single_point("xyz", "", &mut rng), "");
}

// --- Selection ---

#[test]
fn test_tournament_prefers_fitter() {
    let mut rng = rng();
    let pool = vec![Individual::new("lo", 0.1), Individual::new("hi", 0.9)];

    let wins = (0..200)
        .filter(|_| tournament_select(&pool, 3, &mut rng).encoding == "hi")
        .count();
    // P(hi) = 1 - 0.5^3
    assert!(wins > 150, "hi won {wins}/200");
}

#[test]
fn test_roulette_ignores_negative_fitness() {
    let mut rng = rng();
    let pool = vec![Individual::new("neg", -5.0), Individual::new("pos", 2.0)];
    for _ in 0..100 {
        assert_eq!(roulette_select(&pool, &mut rng).encoding, "pos");
    }
}

#[test]
fn test_roulette_uniform_when_all_zero() {
    let mut rng = rng();
    let pool = vec![Individual::new("a", 0.0), Individual::new("b", 0.0)];
    let picked_a = (0..200)
        .filter(|_| roulette_select(&pool, &mut rng).encoding == "a")
        .count();
    assert!(picked_a > 50 && picked_a < 150);
}

#[test]
fn test_rank_population_is_stable() {
    let mut pop = vec![
        Individual::new("first", 0.5),
        Individual::new("best", 0.9),
        Individual::new("second", 0.5),
    ];
    rank_population(&mut pop);
    let order: Vec<&str> = pop.iter().map(|i| i.encoding.as_str()).collect();
    assert_eq!(order, vec!["best", "first", "second"]);
}
