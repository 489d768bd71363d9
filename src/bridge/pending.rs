use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{RepairError, Result};

pub type Resolver = oneshot::Sender<Result<Value>>;

/// Outstanding requests, keyed by correlation id.
///
/// An entry leaves the table exactly once: through [`resolve`](Self::resolve)
/// or [`claim`](Self::claim) (a `result`/`error` reply), through
/// [`fail_all`](Self::fail_all), or through the timeout path in
/// [`wait`](Self::wait). Whoever removes it is
/// the only one allowed to complete the call.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, Resolver>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `id` is already outstanding.
    pub fn register(&self, id: &str) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut calls = self.calls.lock();
        if calls.contains_key(id) {
            return Err(RepairError::Protocol(format!("duplicate request id {id}")));
        }
        let (tx, rx) = oneshot::channel();
        calls.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Completes the call registered under `id`.
    ///
    /// Returns `false` for unknown ids (never sent, already answered, or
    /// timed out); such replies are dropped.
    pub fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        match self.claim(id) {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!("discarding reply for unknown or expired request {id}");
                false
            }
        }
    }

    /// Removes the entry and hands its resolver to the caller, who then owns
    /// completion of the call.
    pub fn claim(&self, id: &str) -> Option<Resolver> {
        self.calls.lock().remove(id)
    }

    /// Drops the entry without completing it. Returns whether it was present.
    pub fn cancel(&self, id: &str) -> bool {
        self.calls.lock().remove(id).is_some()
    }

    /// Fails every outstanding call with [`RepairError::WorkerTerminated`].
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, Resolver)> = self.calls.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(RepairError::WorkerTerminated(reason.to_string())));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits the reply for `id`, giving up after `timeout`.
    ///
    /// If the timer fires but a reply already claimed the entry, that reply
    /// wins: the call completes once, with the reply.
    pub async fn wait(
        &self,
        id: &str,
        mut rx: oneshot::Receiver<Result<Value>>,
        timeout: Duration,
    ) -> Result<Value> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RepairError::WorkerTerminated(
                "reply channel dropped".into(),
            )),
            Err(_) => {
                if self.cancel(id) {
                    Err(RepairError::RequestTimeout {
                        id: id.to_string(),
                        timeout,
                    })
                } else {
                    rx.await.unwrap_or_else(|_| {
                        Err(RepairError::WorkerTerminated("reply channel dropped".into()))
                    })
                }
            }
        }
    }
}
