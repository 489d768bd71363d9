use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::bridge::pending::PendingCalls;
use crate::bridge::process::{WorkerCommand, WorkerProcess};
use crate::bridge::protocol::{
    CorrelatedMessage, EvaluatePayload, EvaluateResponse, EvolvePayload, IdGenerator,
    InitializeResponse, MessageType, RefinePayload, SERVER_ERROR_ID,
};
use crate::core::constraints::Constraint;
use crate::core::domain::{EvolutionConfig, EvolutionResult, ScoredSolution};
use crate::error::{RepairError, Result};
use crate::solvers::local::LocalEngine;
use crate::solvers::{GenStats, RepairEngine};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Starting,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Starting => "starting",
            BridgeState::Connected => "connected",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub worker: WorkerCommand,
    pub host: String,
    /// Fixed worker port; `None` negotiates a free one.
    pub port: Option<u16>,
    pub startup_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// Run parameters sent with every `evolve`/`refine`; `None` leaves the
    /// worker on its own config.
    pub evolution: Option<EvolutionConfig>,
    /// Progress updates buffered per subscriber before it starts lagging.
    pub progress_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker: WorkerCommand::current_exe()
                .unwrap_or_else(|_| WorkerCommand::new("genetic-repair", &["worker"])),
            host: "127.0.0.1".to_string(),
            port: None,
            startup_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            evolution: None,
            progress_capacity: 1024,
        }
    }
}

/// State shared between callers and the background reader/watcher tasks.
struct Shared {
    state: Mutex<BridgeState>,
    pending: PendingCalls,
    ids: IdGenerator,
    progress: broadcast::Sender<GenStats>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    worker_pid: Mutex<Option<u32>>,
}

impl Shared {
    fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    fn set_state(&self, next: BridgeState) {
        let mut state = self.state.lock();
        debug!("bridge state {} -> {}", *state, next);
        *state = next;
    }

    /// Handles an inbound frame from the worker.
    fn dispatch(&self, text: &str) {
        let msg: CorrelatedMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed message from worker: {e}");
                return;
            }
        };

        match msg.kind {
            MessageType::Result => {
                if let Some(id) = msg.id {
                    self.pending.resolve(&id, Ok(msg.payload));
                }
            }
            MessageType::Error => {
                let message = msg
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified worker error")
                    .to_string();
                match msg.id.as_deref() {
                    Some(SERVER_ERROR_ID) | None => warn!("worker error: {message}"),
                    Some(id) => {
                        self.pending.resolve(id, Err(RepairError::Remote(message)));
                    }
                }
            }
            MessageType::Progress => match serde_json::from_value::<GenStats>(msg.payload) {
                // No subscribers is fine.
                Ok(stats) => {
                    let _ = self.progress.send(stats);
                }
                Err(e) => debug!("unrecognised progress payload: {e}"),
            },
            other => warn!("ignoring unexpected '{other}' message from worker"),
        }
    }

    /// Worker or channel lost while starting or connected.
    fn terminate(&self, reason: &str) {
        let lost = {
            let mut state = self.state.lock();
            let lost = matches!(*state, BridgeState::Starting | BridgeState::Connected);
            if lost {
                *state = BridgeState::Closed;
            }
            lost
        };
        if lost {
            self.outbound.lock().take();
            let failed = self.pending.fail_all(reason);
            error!("worker lost ({reason}); failed {failed} outstanding call(s)");
        }
    }
}

struct Session {
    worker: WorkerProcess,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    async fn shutdown(self) {
        // The writer flushes and sends a close frame once its queue is dropped.
        let mut writer = self.writer;
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        self.reader.abort();
        self.worker.terminate().await;
    }
}

/// Client side of the worker protocol.
///
/// Exposes the same operations as [`LocalEngine`]; with a fallback engine
/// configured, calls made while not connected run in-process instead.
/// The worker is never restarted automatically: after a crash the bridge is
/// `Closed` until the caller runs [`initialize`](Self::initialize) again.
pub struct ProcessBridge {
    config: BridgeConfig,
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
    fallback: Option<LocalEngine>,
}

impl ProcessBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (progress, _) = broadcast::channel(config.progress_capacity.max(1));
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(BridgeState::Uninitialized),
                pending: PendingCalls::new(),
                ids: IdGenerator::new(),
                progress,
                outbound: Mutex::new(None),
                worker_pid: Mutex::new(None),
            }),
            session: tokio::sync::Mutex::new(None),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, engine: LocalEngine) -> Self {
        self.fallback = Some(engine);
        self
    }

    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    pub fn worker_pid(&self) -> Option<u32> {
        *self.shared.worker_pid.lock()
    }

    /// Progress events forwarded by the worker, in emission order.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<GenStats> {
        self.shared.progress.subscribe()
    }

    /// Spawns the worker and connects to it.
    ///
    /// A no-op when already connected; rejected while another start is in
    /// progress. Any failure leaves the bridge `Closed`.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                BridgeState::Connected => {
                    debug!("initialize() on a connected bridge ignored");
                    return Ok(());
                }
                BridgeState::Starting | BridgeState::Closing => {
                    return Err(RepairError::AlreadyStarting)
                }
                BridgeState::Uninitialized | BridgeState::Closed => {
                    *state = BridgeState::Starting;
                }
            }
        }

        // Leftovers from a crashed worker.
        if let Some(stale) = self.session.lock().await.take() {
            stale.shutdown().await;
        }

        match self.start().await {
            Ok(session) => {
                *self.session.lock().await = Some(session);
                info!("bridge connected");
                Ok(())
            }
            Err(e) => {
                self.shared.outbound.lock().take();
                self.shared.worker_pid.lock().take();
                self.shared.set_state(BridgeState::Closed);
                error!("bridge initialization failed: {e}");
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<Session> {
        let port = match self.config.port {
            Some(port) => port,
            None => negotiate_port(&self.config.host)?,
        };

        let shared = Arc::downgrade(&self.shared);
        let mut worker = WorkerProcess::spawn(&self.config.worker, port, move |status| {
            if let Some(shared) = shared.upgrade() {
                shared.terminate(&format!("worker process exited ({status:?})"));
            }
        })?;
        *self.shared.worker_pid.lock() = worker.pid();

        worker.wait_ready(self.config.startup_timeout).await?;

        let url = format!("ws://{}:{}", self.config.host, port);
        let stream = tokio::time::timeout(self.config.handshake_timeout, connect_with_retry(&url))
            .await
            .map_err(|_| {
                RepairError::Handshake(format!(
                    "no connection to {url} within {:?}",
                    self.config.handshake_timeout
                ))
            })?;

        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(tx);
        let session = Session {
            worker,
            reader: tokio::spawn(read_loop(self.shared.clone(), source)),
            writer: tokio::spawn(write_loop(sink, rx)),
        };

        // The state stays `Starting` until the worker answers `initialize`.
        let handshake = self
            .request(MessageType::Initialize, json!({}), self.config.handshake_timeout)
            .await
            .and_then(|v| Ok(serde_json::from_value::<InitializeResponse>(v)?));
        let reply = match handshake {
            Ok(reply) => reply,
            Err(e) => {
                // Closing keeps the reader's shutdown from reporting a lost worker.
                self.shared.set_state(BridgeState::Closing);
                self.shared.outbound.lock().take();
                session.shutdown().await;
                return Err(RepairError::Handshake(e.to_string()));
            }
        };

        let promoted = {
            let mut state = self.shared.state.lock();
            let promoted = *state == BridgeState::Starting;
            if promoted {
                *state = BridgeState::Connected;
            }
            promoted
        };
        if !promoted {
            session.shutdown().await;
            return Err(RepairError::WorkerTerminated(
                "worker exited during startup".into(),
            ));
        }

        debug!(
            "worker status '{}', fitness functions: {:?}",
            reply.status, reply.fitness_functions
        );
        Ok(session)
    }

    /// Sends one request and awaits the correlated reply payload.
    pub async fn send_message(&self, kind: MessageType, payload: Value) -> Result<Value> {
        let state = self.state();
        if state != BridgeState::Connected {
            return Err(RepairError::NotConnected(state));
        }
        self.request(kind, payload, self.config.request_timeout).await
    }

    async fn request(&self, kind: MessageType, payload: Value, timeout: Duration) -> Result<Value> {
        let id = self.shared.ids.next_id();
        let text = serde_json::to_string(&CorrelatedMessage::new(kind, id.clone(), payload))?;

        // Register first: the reply may beat the send call back.
        let rx = self.shared.pending.register(&id)?;
        let sent = match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(Message::Text(text.into())).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.pending.cancel(&id);
            return Err(RepairError::WorkerTerminated(
                "channel to worker is closed".into(),
            ));
        }

        debug!("-> {kind} {id}");
        self.shared.pending.wait(&id, rx, timeout).await
    }

    /// Asks the worker to stop (best effort), then tears everything down.
    ///
    /// Fails with [`RepairError::AlreadyStarting`] while a worker is being
    /// started; close once `initialize()` has returned.
    pub async fn close(&self) -> Result<()> {
        let was_connected = {
            let mut state = self.shared.state.lock();
            match *state {
                BridgeState::Connected => {
                    *state = BridgeState::Closing;
                    true
                }
                BridgeState::Starting => return Err(RepairError::AlreadyStarting),
                BridgeState::Closing => {
                    debug!("close() while closing ignored");
                    return Ok(());
                }
                BridgeState::Uninitialized | BridgeState::Closed => false,
            }
        };

        if was_connected {
            let wait = CLOSE_ACK_TIMEOUT.min(self.config.request_timeout);
            if let Err(e) = self.request(MessageType::Close, json!({}), wait).await {
                warn!("close message not acknowledged: {e}");
            }
        }

        self.shared.outbound.lock().take();
        if let Some(session) = self.session.lock().await.take() {
            session.shutdown().await;
        }
        self.shared.worker_pid.lock().take();
        self.shared.pending.fail_all("bridge closed");

        if self.state() != BridgeState::Uninitialized {
            self.shared.set_state(BridgeState::Closed);
        }
        info!("bridge closed");
        Ok(())
    }

    fn local_fallback(&self) -> Option<&LocalEngine> {
        if self.state() == BridgeState::Connected {
            return None;
        }
        if self.fallback.is_some() {
            debug!("worker not connected, running locally");
        }
        self.fallback.as_ref()
    }
}

#[async_trait]
impl RepairEngine for ProcessBridge {
    async fn evolve(
        &self,
        candidates: Vec<String>,
        constraints: Vec<Constraint>,
        fitness: &str,
        rounds: u32,
    ) -> Result<EvolutionResult> {
        if candidates.is_empty() {
            return Err(RepairError::Configuration(
                "at least one candidate is required".into(),
            ));
        }
        if let Some(local) = self.local_fallback() {
            return local.evolve(candidates, constraints, fitness, rounds).await;
        }

        let payload = serde_json::to_value(EvolvePayload {
            candidates,
            constraints,
            fitness_function: fitness.to_string(),
            recursion_rounds: rounds,
            config: self.config.evolution.clone(),
        })?;
        let reply = self.send_message(MessageType::Evolve, payload).await?;
        Ok(serde_json::from_value(reply)?)
    }

    async fn refine(&self, solution: String, constraints: Vec<Constraint>) -> Result<EvolutionResult> {
        if let Some(local) = self.local_fallback() {
            return local.refine(solution, constraints).await;
        }

        let payload = serde_json::to_value(RefinePayload {
            solution,
            constraints,
            config: self.config.evolution.clone(),
        })?;
        let reply = self.send_message(MessageType::Refine, payload).await?;
        Ok(serde_json::from_value(reply)?)
    }

    async fn evaluate(&self, solutions: Vec<String>, fitness: &str) -> Result<Vec<ScoredSolution>> {
        if let Some(local) = self.local_fallback() {
            return local.evaluate(solutions, fitness).await;
        }

        let payload = serde_json::to_value(EvaluatePayload {
            solutions,
            fitness_function: fitness.to_string(),
        })?;
        let reply = self.send_message(MessageType::Evaluate, payload).await?;
        let response: EvaluateResponse = serde_json::from_value(reply)?;
        Ok(response.results)
    }
}

// --- Channel tasks ---

fn negotiate_port(host: &str) -> Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

async fn connect_with_retry(url: &str) -> WsStream {
    loop {
        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => return stream,
            Err(e) => {
                debug!("connect to {url} failed ({e}), retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut source: SplitStream<WsStream>) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(&text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("websocket error: {e}");
                break;
            }
        }
    }
    shared.terminate("channel to worker closed");
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            warn!("failed to send to worker: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}
