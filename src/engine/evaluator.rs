use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;

/// Scores an encoding. Higher is better.
///
/// Implementations must be thread-safe (`Send + Sync`): one function may be
/// shared by several concurrent runs.
pub trait FitnessFunction: Send + Sync {
    fn fitness<'a>(&'a self, encoding: &'a str) -> BoxFuture<'a, Result<f64>>;

    /// Returns the name the function is registered under.
    fn name(&self) -> &str;
}

/// Adapts an async closure into a [`FitnessFunction`].
pub struct FnFitness<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnFitness<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<f64>> + Send + 'static,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F, Fut> FitnessFunction for FnFitness<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<f64>> + Send + 'static,
{
    fn fitness<'a>(&'a self, encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        (self.f)(encoding.to_string()).boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Synchronous scoring rule, used by the built-in registry entries.
pub struct Heuristic {
    name: String,
    score: Box<dyn Fn(&str) -> f64 + Send + Sync>,
}

impl Heuristic {
    pub fn new(name: &str, score: impl Fn(&str) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            score: Box::new(score),
        }
    }
}

impl FitnessFunction for Heuristic {
    fn fitness<'a>(&'a self, encoding: &'a str) -> BoxFuture<'a, Result<f64>> {
        let value = (self.score)(encoding);
        async move { Ok(value) }.boxed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs the fitness function and never fails.
///
/// Errors, panics and non-finite values all score 0 so the generation loop
/// stays total.
pub async fn score(fitness: &dyn FitnessFunction, encoding: &str) -> f64 {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| fitness.fitness(encoding))) {
        Ok(fut) => fut,
        Err(_) => {
            debug!("fitness '{}' panicked while building its future", fitness.name());
            return 0.0;
        }
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) if value.is_finite() => value,
        Ok(Ok(value)) => {
            debug!("fitness '{}' returned non-finite {}", fitness.name(), value);
            0.0
        }
        Ok(Err(e)) => {
            debug!("fitness '{}' failed: {:#}", fitness.name(), e);
            0.0
        }
        Err(_) => {
            debug!("fitness '{}' panicked", fitness.name());
            0.0
        }
    }
}
