use std::path::PathBuf;
use std::process::{Command, Output};

use genetic_repair::core::domain::{EvolutionConfig, EvolutionResult};

fn cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_genetic-repair"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn evolve_result(args: &[&str]) -> EvolutionResult {
    let output = cli(args);
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn scratch_file(suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("genetic-repair-{}{suffix}", uuid::Uuid::new_v4()))
}

#[test]
fn test_remote_run_uses_command_line_parameters() {
    let args = [
        "evolve", "-c", "abc", "-f", "char_ratio:z", "--generations", "0", "--population", "4",
        "--seed", "1",
    ];
    let local = evolve_result(&args);
    let remote = evolve_result(&[&args[..], &["--remote"]].concat());

    assert_eq!(local.generation, 0);
    assert_eq!(remote.generation, local.generation);
    assert_eq!(remote.solution, local.solution);
}

#[test]
fn test_remote_history_records_every_generation() {
    let config_path = scratch_file(".json");
    let history_path = scratch_file(".csv");
    let config = EvolutionConfig {
        alphabet: "ab".into(),
        population_size: 4,
        max_generations: 300,
        ..Default::default()
    };
    std::fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

    let result = evolve_result(&[
        "evolve",
        "-c",
        "abab",
        "-f",
        "char_ratio:z",
        "--config",
        config_path.to_str().unwrap(),
        "--history",
        history_path.to_str().unwrap(),
        "--remote",
    ]);
    assert_eq!(result.generation, 300);

    let mut reader = csv::Reader::from_path(&history_path).unwrap();
    let generations: Vec<usize> = reader
        .records()
        .map(|r| r.unwrap()[0].parse().unwrap())
        .collect();
    assert_eq!(generations, (0..=300).collect::<Vec<_>>());

    let _ = std::fs::remove_file(config_path);
    let _ = std::fs::remove_file(history_path);
}

#[test]
fn test_unknown_selection_method_is_rejected() {
    let output = cli(&["evolve", "-c", "abc", "--selection", "roulete"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("roulete"));

    let result = evolve_result(&[
        "evolve", "-c", "abc", "-f", "char_ratio:a", "--selection", "roulette", "--seed", "3",
        "--generations", "2",
    ]);
    assert!(result.generation <= 2);
}
