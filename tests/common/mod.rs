#![allow(dead_code)]

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use genetic_repair::bridge::{BridgeConfig, WorkerCommand};
use genetic_repair::core::domain::EvolutionConfig;
use genetic_repair::engine::evaluator::FitnessFunction;
use genetic_repair::engine::registry::char_ratio;

/// Share of `target` characters, async like a real remote evaluator.
pub struct MockRatio(pub char);

impl FitnessFunction for MockRatio {
    fn fitness<'a>(&'a self, encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        let value = char_ratio(encoding, self.0);
        async move { Ok(value) }.boxed()
    }

    fn name(&self) -> &str {
        "mock_ratio"
    }
}

/// Every evaluation fails.
pub struct AlwaysFails;

impl FitnessFunction for AlwaysFails {
    fn fitness<'a>(&'a self, _encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        Box::pin(async { Err::<f64, _>(anyhow!("evaluator offline")) })
    }

    fn name(&self) -> &str {
        "always_fails"
    }
}

/// Panics before returning a future.
pub struct PanicsEagerly;

impl FitnessFunction for PanicsEagerly {
    fn fitness<'a>(&'a self, _encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        panic!("fitness exploded")
    }

    fn name(&self) -> &str {
        "panics_eagerly"
    }
}

/// Panics while being polled.
pub struct PanicsWhenPolled;

impl FitnessFunction for PanicsWhenPolled {
    fn fitness<'a>(&'a self, encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        Box::pin(async move {
            if encoding.len() < usize::MAX {
                panic!("fitness exploded while polling");
            }
            Ok(0.0)
        })
    }

    fn name(&self) -> &str {
        "panics_when_polled"
    }
}

/// Always scores NaN.
pub struct NotANumber;

impl FitnessFunction for NotANumber {
    fn fitness<'a>(&'a self, _encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        Box::pin(async { Ok(f64::NAN) })
    }

    fn name(&self) -> &str {
        "nan"
    }
}

/// Small seeded config so runs are quick and reproducible.
pub fn quick_config(seed: u64) -> EvolutionConfig {
    EvolutionConfig {
        population_size: 8,
        max_generations: 10,
        seed: Some(seed),
        ..Default::default()
    }
}

pub fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_genetic-repair"), &["worker"])
}

pub fn bridge_config() -> BridgeConfig {
    BridgeConfig {
        worker: worker_command(),
        startup_timeout: Duration::from_secs(20),
        handshake_timeout: Duration::from_secs(10),
        request_timeout: Duration::from_secs(60),
        ..Default::default()
    }
}
