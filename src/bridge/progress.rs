use log::warn;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::solvers::GenStats;

/// Records progress updates in a background task while a call runs.
///
/// A lagging subscriber loses the skipped updates, logs how many, and keeps
/// recording.
pub struct ProgressLog {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Vec<GenStats>>,
}

impl ProgressLog {
    pub fn start(mut rx: broadcast::Receiver<GenStats>) -> Self {
        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut history = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    received = rx.recv() => match received {
                        Ok(stats) => history.push(stats),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("progress log fell behind, {skipped} update(s) lost")
                        }
                        Err(RecvError::Closed) => return history,
                    },
                    _ = &mut stop_rx => break,
                }
            }

            // Updates already buffered when the call returned.
            loop {
                match rx.try_recv() {
                    Ok(stats) => history.push(stats),
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("progress log fell behind, {skipped} update(s) lost")
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
            history
        });
        Self { stop, task }
    }

    /// Stops recording and returns everything received, in order.
    pub async fn finish(self) -> Vec<GenStats> {
        let _ = self.stop.send(());
        self.task.await.unwrap_or_default()
    }
}
