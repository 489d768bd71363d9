use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::protocol::{
    CorrelatedMessage, EvaluatePayload, EvaluateResponse, EvolvePayload, InitializeResponse,
    MessageType, RefinePayload, READY_MARKER, SERVER_ERROR_ID,
};
use crate::core::domain::EvolutionConfig;
use crate::solvers::local::LocalEngine;
use crate::solvers::{EvolutionEvent, RepairEngine};

const ACK_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type Outbound = mpsc::UnboundedSender<CorrelatedMessage>;

/// Worker side of the protocol: serves engine operations over WebSocket.
pub struct WorkerServer {
    engine: LocalEngine,
    host: String,
    port: u16,
}

impl WorkerServer {
    pub fn new(engine: LocalEngine, host: &str, port: u16) -> Self {
        Self {
            engine,
            host: host.to_string(),
            port,
        }
    }

    /// Serves until a client sends `close`.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", self.host, self.port))?;
        let port = listener.local_addr()?.port();
        info!("worker listening on {}:{}", self.host, port);

        // The bridge waits for this exact line.
        {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{READY_MARKER} {port}")?;
            stdout.flush()?;
        }

        let shutdown = Arc::new(Notify::new());
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(
                            self.engine.clone(),
                            stream,
                            peer,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                _ = shutdown.notified() => {
                    info!("close requested, shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn serve_connection(engine: LocalEngine, stream: TcpStream, peer: SocketAddr, shutdown: Arc<Notify>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("handshake with {peer} failed: {e}");
            return;
        }
    };
    info!("client connected: {peer}");

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<CorrelatedMessage>();
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode reply: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut close_requested = false;
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let msg: CorrelatedMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        let _ = tx.send(CorrelatedMessage::error(
                            SERVER_ERROR_ID,
                            format!("Invalid JSON message: {e}"),
                        ));
                        continue;
                    }
                };
                if msg.kind == MessageType::Close {
                    if let Some(id) = msg.id {
                        let reply = CorrelatedMessage::new(MessageType::Result, id, json!({ "status": "closing" }));
                        let _ = tx.send(reply);
                    }
                    close_requested = true;
                    break;
                }
                tokio::spawn(handle_request(engine.clone(), msg, tx.clone()));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("websocket error from {peer}: {e}");
                break;
            }
        }
    }

    drop(tx);
    if close_requested {
        // Give the acknowledgement a chance to leave before the process exits.
        let _ = tokio::time::timeout(ACK_FLUSH_TIMEOUT, &mut writer).await;
        shutdown.notify_one();
    } else {
        let _ = writer.await;
    }
    info!("client disconnected: {peer}");
}

async fn handle_request(engine: LocalEngine, msg: CorrelatedMessage, tx: Outbound) {
    let Some(id) = msg.id else {
        warn!("ignoring '{}' message without id", msg.kind);
        return;
    };
    debug!("<- {} {}", msg.kind, id);

    let reply = match dispatch(&engine, msg.kind, msg.payload, &tx).await {
        Ok(payload) => CorrelatedMessage::new(MessageType::Result, id, payload),
        Err(e) => {
            warn!("{} {} failed: {:#}", msg.kind, id, e);
            CorrelatedMessage::error(id, format!("Error handling message: {e:#}"))
        }
    };
    let _ = tx.send(reply);
}

async fn dispatch(engine: &LocalEngine, kind: MessageType, payload: Value, tx: &Outbound) -> Result<Value> {
    match kind {
        MessageType::Initialize => Ok(serde_json::to_value(InitializeResponse {
            status: "success".to_string(),
            fitness_functions: engine.registry().names(),
        })?),
        MessageType::Evolve => {
            let req: EvolvePayload = serde_json::from_value(payload)?;
            let (observed, forwarder) = observe(&configured(engine, req.config)?, tx);
            let result = observed
                .evolve(req.candidates, req.constraints, &req.fitness_function, req.recursion_rounds)
                .await;
            // Progress must leave before the result.
            drop(observed);
            let _ = forwarder.await;
            Ok(serde_json::to_value(result?)?)
        }
        MessageType::Refine => {
            let req: RefinePayload = serde_json::from_value(payload)?;
            let (observed, forwarder) = observe(&configured(engine, req.config)?, tx);
            let result = observed.refine(req.solution, req.constraints).await;
            drop(observed);
            let _ = forwarder.await;
            Ok(serde_json::to_value(result?)?)
        }
        MessageType::Evaluate => {
            let req: EvaluatePayload = serde_json::from_value(payload)?;
            let results = engine.evaluate(req.solutions, &req.fitness_function).await?;
            Ok(serde_json::to_value(EvaluateResponse { results })?)
        }
        other => bail!("Unknown message type: {other}"),
    }
}

/// The engine with the caller's run parameters, if it sent any.
fn configured(engine: &LocalEngine, config: Option<EvolutionConfig>) -> Result<LocalEngine> {
    match config {
        Some(config) => {
            config.validate()?;
            Ok(engine.clone().with_config(config))
        }
        None => Ok(engine.clone()),
    }
}

/// An engine copy whose generation updates are relayed as `progress` messages.
/// The relay ends once the copy is dropped.
fn observe(engine: &LocalEngine, tx: &Outbound) -> (LocalEngine, JoinHandle<()>) {
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let tx = tx.clone();
    let forwarder = tokio::task::spawn_blocking(move || relay_progress(events_rx, tx));
    (engine.clone().with_observer(events_tx), forwarder)
}

fn relay_progress(events: Receiver<EvolutionEvent>, tx: Outbound) {
    for event in events {
        if let EvolutionEvent::GenerationUpdate(stats) = event {
            match serde_json::to_value(&stats) {
                Ok(payload) => {
                    let _ = tx.send(CorrelatedMessage::progress(payload));
                }
                Err(e) => debug!("unencodable progress: {e}"),
            }
        }
    }
}
