//! Runner controller: owns at most one worker and projects its events into
//! display state for a UI host.

use crate::error::RunError;
use crate::limits::ResourceLimits;
use crate::render;
use crate::runtime::{Engine, EntryConvention, V8Engine};
use crate::worker::Worker;
use dynnode_common::{LogEntry, LogLevel, RunRequest, WorkerCommand, WorkerEvent};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_LOG_CAPACITY: usize = 500;
pub const DEFAULT_HARD_KILL_GRACE: Duration = Duration::from_millis(1000);

const STOPPED_LOG: &str = "stopped (terminate worker)";
const DISCONNECTED_LOG: &str = "worker disconnected unexpectedly";
const UNRESPONSIVE_LOG: &str = "worker unresponsive (terminate worker)";

/// Controller settings
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Most recent log lines kept in the display state
    pub log_capacity: usize,
    /// Extra time past `timeoutMs` before an unresponsive worker is destroyed
    pub hard_kill_grace: Duration,
    pub limits: ResourceLimits,
    pub entry: EntryConvention,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            hard_kill_grace: DEFAULT_HARD_KILL_GRACE,
            limits: ResourceLimits::default(),
            entry: EntryConvention::default(),
        }
    }
}

/// What a host renders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub logs: VecDeque<LogEntry>,
    pub result_text: String,
    pub error_text: String,
    pub running: bool,
}

impl DisplayState {
    fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.logs.push_back(entry);
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
    }

    fn clear_output(&mut self) {
        self.logs.clear();
        self.result_text.clear();
        self.error_text.clear();
    }

    /// `[ERROR]`/`[RESULT]` panel text
    pub fn panel(&self) -> String {
        render::panel_text(&self.result_text, &self.error_text)
    }
}

struct Inner {
    worker: Option<Worker>,
    /// Bumped whenever a worker is discarded; events tagged with an older
    /// epoch are dropped.
    epoch: u64,
    run_seq: u64,
}

struct Shared {
    config: ControllerConfig,
    engine: Arc<dyn Engine>,
    state_tx: watch::Sender<DisplayState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut DisplayState)) {
        self.state_tx.send_modify(f);
    }

    fn apply(&self, epoch: u64, event: WorkerEvent) {
        let inner = self.inner();
        if inner.epoch != epoch {
            tracing::trace!(kind = event.kind(), "Dropping event from discarded worker");
            return;
        }

        let capacity = self.config.log_capacity;
        self.update(|state| match event {
            WorkerEvent::Log(entry) => state.push_log(entry, capacity),
            WorkerEvent::Result { value, .. } => {
                state.result_text = render::result_text(&value);
                state.error_text.clear();
            }
            WorkerEvent::Error {
                message,
                stack_trace,
                ..
            } => {
                state.error_text = render::error_text(&message, stack_trace.as_deref());
                state.result_text.clear();
            }
            WorkerEvent::Done { .. } => state.running = false,
        });
        drop(inner);
    }

    /// The worker's event channel closed
    fn disconnected(&self, epoch: u64) {
        let mut inner = self.inner();
        if inner.epoch != epoch {
            return;
        }
        inner.worker = None;
        inner.epoch += 1;

        let capacity = self.config.log_capacity;
        self.update(|state| {
            if state.running {
                tracing::error!("Worker disconnected during a run");
                state.running = false;
                state.push_log(LogEntry::new(LogLevel::Error, DISCONNECTED_LOG), capacity);
            } else {
                tracing::warn!("Idle worker disconnected");
            }
        });
    }

    /// Hard deadline for run `seq` on worker `epoch`
    fn expire(&self, epoch: u64, seq: u64, timeout_ms: u64) {
        let mut inner = self.inner();
        if inner.epoch != epoch || inner.run_seq != seq || !self.state_tx.borrow().running {
            return;
        }

        tracing::warn!(timeout_ms, "Worker missed its deadline, destroying it");
        if let Some(worker) = inner.worker.take() {
            worker.terminate();
        }
        inner.epoch += 1;

        let capacity = self.config.log_capacity;
        self.update(|state| {
            state.running = false;
            if state.error_text.is_empty() {
                state.error_text = RunError::Timeout { timeout_ms }.to_string();
                state.result_text.clear();
            }
            state.push_log(LogEntry::new(LogLevel::Warn, UNRESPONSIVE_LOG), capacity);
        });
    }

    fn discard_worker(&self, inner: &mut Inner) {
        if let Some(worker) = inner.worker.take() {
            worker.terminate();
        }
        inner.epoch += 1;
    }
}

/// Drives runs on a lazily spawned worker. Operations never fail; problems
/// surface in the display state.
pub struct RunnerController {
    shared: Arc<Shared>,
}

impl RunnerController {
    pub fn new(config: ControllerConfig) -> Self {
        let engine = V8Engine::with_limits(config.limits.clone()).with_entry(config.entry);
        Self::with_engine(config, Arc::new(engine))
    }

    /// Controller over a custom engine
    pub fn with_engine(config: ControllerConfig, engine: Arc<dyn Engine>) -> Self {
        let (state_tx, _) = watch::channel(DisplayState::default());
        Self {
            shared: Arc::new(Shared {
                config,
                engine,
                state_tx,
                inner: Mutex::new(Inner {
                    worker: None,
                    epoch: 0,
                    run_seq: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Start a run; returns false (and changes nothing) while one is in progress.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(&self, code: &str, context_text: &str, timeout_ms: u64) -> bool {
        let shared = &self.shared;
        let mut inner = shared.inner();
        if shared.state_tx.borrow().running {
            tracing::debug!("Run ignored, already running");
            return false;
        }

        let capacity = shared.config.log_capacity;
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                shared.update(|state| {
                    state.clear_output();
                    state.error_text =
                        RunError::Transport(format!("no async runtime: {}", e)).to_string();
                });
                return false;
            }
        };

        shared.update(|state| {
            state.clear_output();
            state.running = true;
        });

        if inner.worker.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            match Worker::spawn(shared.engine.clone(), tx) {
                Ok(worker) => {
                    inner.epoch += 1;
                    tracing::debug!(worker_id = worker.id(), epoch = inner.epoch, "Worker spawned");
                    handle.spawn(pump(Arc::downgrade(shared), inner.epoch, rx));
                    inner.worker = Some(worker);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to spawn worker");
                    shared.update(|state| {
                        state.running = false;
                        state.push_log(LogEntry::new(LogLevel::Error, DISCONNECTED_LOG), capacity);
                        state.error_text = RunError::Transport(e.to_string()).to_string();
                    });
                    return false;
                }
            }
        }

        let request = RunRequest::new(code, context_text, timeout_ms);
        let timeout_ms = request.timeout_ms;
        let sent = match inner.worker.as_ref() {
            Some(worker) => worker.send(WorkerCommand::Run(request)),
            None => Err(RunError::Transport("no worker".into())),
        };
        if let Err(e) = sent {
            tracing::error!(error = %e, "Failed to deliver run");
            shared.discard_worker(&mut inner);
            shared.update(|state| {
                state.running = false;
                state.push_log(LogEntry::new(LogLevel::Error, DISCONNECTED_LOG), capacity);
                state.error_text = e.to_string();
            });
            return false;
        }

        inner.run_seq += 1;
        let (epoch, seq) = (inner.epoch, inner.run_seq);
        let deadline = Duration::from_millis(timeout_ms) + shared.config.hard_kill_grace;
        let weak = Arc::downgrade(shared);
        handle.spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(epoch, seq, timeout_ms);
            }
        });

        tracing::info!(timeout_ms, code_len = code.len(), "Run started");
        true
    }

    /// Advisory STOP followed by destroying the worker
    pub fn stop(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner();
        if let Some(worker) = inner.worker.as_ref() {
            let _ = worker.send(WorkerCommand::Stop);
        }
        shared.discard_worker(&mut inner);

        let capacity = shared.config.log_capacity;
        shared.update(|state| {
            state.running = false;
            state.push_log(LogEntry::new(LogLevel::Warn, STOPPED_LOG), capacity);
        });
        tracing::info!("Run stopped");
    }

    /// Clear logs, result and error
    pub fn reset(&self) {
        self.shared.update(DisplayState::clear_output);
    }

    pub fn is_running(&self) -> bool {
        self.shared.state_tx.borrow().running
    }

    pub fn state(&self) -> DisplayState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.shared.state_tx.subscribe()
    }

    /// Terminate the active worker, if any
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner();
        if inner.worker.is_some() {
            self.shared.discard_worker(&mut inner);
        }
    }
}

impl Drop for RunnerController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump(shared: Weak<Shared>, epoch: u64, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = rx.recv().await {
        match shared.upgrade() {
            Some(shared) => shared.apply(epoch, event),
            None => return,
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.disconnected(epoch);
    }
}
