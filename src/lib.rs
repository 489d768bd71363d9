//! Evolutionary repair of text candidates under constraints.
//!
//! [`solvers::ga::GeneticAlgorithm`] runs the generation loop in-process;
//! [`bridge::ProcessBridge`] offers the same operations backed by a worker
//! process.

pub mod bridge;
pub mod core;
pub mod engine;
pub mod error;
pub mod solvers;

pub use error::{RepairError, Result};
