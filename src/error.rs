use std::time::Duration;
use thiserror::Error;

use crate::bridge::BridgeState;

/// Every failure surfaced by the engine or the bridge.
///
/// Fitness-function failures never show up here: the engine maps them to a
/// fitness of 0 so that a run always terminates.
#[derive(Debug, Error)]
pub enum RepairError {
    /// Bad caller input (empty seed list, out-of-range rates, ...).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The worker never printed its readiness line.
    #[error("worker did not become ready: {0}")]
    StartupTimeout(String),

    /// The channel to the worker could not be established.
    #[error("handshake with worker failed: {0}")]
    Handshake(String),

    #[error("request {id} timed out after {timeout:?}")]
    RequestTimeout { id: String, timeout: Duration },

    /// The worker process (or its channel) went away with calls in flight.
    #[error("worker terminated: {0}")]
    WorkerTerminated(String),

    /// The worker answered with an `error` message.
    #[error("worker reported an error: {0}")]
    Remote(String),

    #[error("bridge is not connected (state: {0})")]
    NotConnected(BridgeState),

    #[error("bridge is already starting a worker")]
    AlreadyStarting,

    #[error("unknown fitness function '{0}'")]
    UnknownFitness(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RepairError>;
