//! Runs engine operations in a separate worker process.
//!
//! The bridge spawns the worker, waits for its readiness line, connects over
//! WebSocket and correlates JSON requests with their replies by id.

pub mod client;
pub mod pending;
pub mod process;
pub mod progress;
pub mod protocol;
pub mod worker;

pub use client::{BridgeConfig, BridgeState, ProcessBridge};
pub use process::WorkerCommand;
pub use progress::ProgressLog;
pub use worker::WorkerServer;
