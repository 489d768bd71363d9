//! JSON messages exchanged between the bridge and the worker.
//!
//! ```text
//! { "type": "evolve", "id": "1a-3f09c2d1", "payload": { ... }, "timestamp": 1718000000000 }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::constraints::Constraint;
use crate::core::domain::{EvolutionConfig, ScoredSolution};

/// Printed on the worker's stdout once its listener accepts connections.
pub const READY_MARKER: &str = "WebSocket server running on port";

/// Id used by the worker when it cannot tell which request it is answering.
pub const SERVER_ERROR_ID: &str = "server_error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Initialize,
    Evolve,
    Refine,
    Evaluate,
    Result,
    Error,
    Progress,
    Close,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Initialize => "initialize",
            MessageType::Evolve => "evolve",
            MessageType::Refine => "refine",
            MessageType::Evaluate => "evaluate",
            MessageType::Result => "result",
            MessageType::Error => "error",
            MessageType::Progress => "progress",
            MessageType::Close => "close",
        };
        f.write_str(name)
    }
}

/// One unit of the wire protocol.
///
/// `progress` messages carry no id; every other message does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    /// Creation time in ms since the epoch. Diagnostics only.
    #[serde(default)]
    pub timestamp: i64,
}

impl CorrelatedMessage {
    pub fn new(kind: MessageType, id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            id: Some(id.into()),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn progress(payload: Value) -> Self {
        Self {
            kind: MessageType::Progress,
            id: None,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        let payload = serde_json::json!({ "message": message.into() });
        Self::new(MessageType::Error, id, payload)
    }
}

// --- Payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolvePayload {
    pub candidates: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default = "default_fitness")]
    pub fitness_function: String,
    #[serde(default = "default_rounds")]
    pub recursion_rounds: u32,
    /// Run parameters from the caller; the worker's own config when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<EvolutionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinePayload {
    pub solution: String,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<EvolutionConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatePayload {
    pub solutions: Vec<String>,
    #[serde(default = "default_fitness")]
    pub fitness_function: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub results: Vec<ScoredSolution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Answer to `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub status: String,
    #[serde(default)]
    pub fitness_functions: Vec<String>,
}

fn default_fitness() -> String {
    "default".to_string()
}

fn default_rounds() -> u32 {
    2
}

// --- Correlation ids ---

/// Hands out `<counter>-<random>` ids.
///
/// The counter keeps ids from one generator distinct; the random suffix
/// keeps them distinct across generators and restarts.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{:x}-{}", n, &suffix[..8])
    }
}
