//! Per-run state shared between the engine, its watchdog and the worker

use crate::error::RunError;
use dynnode_common::{LogLevel, WorkerEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Identifier used to correlate tracing output of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepting logs and a terminal outcome
    Open,
    /// RESULT or ERROR sent; only DONE may follow
    Settled,
    /// DONE sent; everything else is dropped
    Closed,
}

/// Emits one run's events and enforces `LOG* (RESULT|ERROR)? DONE`.
///
/// The engine thread and the watchdog race to settle a run; whichever gets
/// the phase lock first wins and the loser's events are dropped.
pub struct EventSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
    phase: Mutex<Phase>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            tx,
            phase: Mutex::new(Phase::Open),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, event: WorkerEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }

    /// Returns false when the run no longer accepts logs
    pub fn log(&self, level: LogLevel, text: impl Into<String>) -> bool {
        let phase = self.phase();
        if *phase != Phase::Open {
            return false;
        }
        self.send(WorkerEvent::log(level, text));
        true
    }

    /// Settle with a RESULT; returns false if the run was already settled
    pub fn result(&self, value: serde_json::Value) -> bool {
        self.settle(WorkerEvent::result(value))
    }

    /// Settle with an ERROR; returns false if the run was already settled
    pub fn fail(&self, error: &RunError) -> bool {
        self.settle(error.to_event())
    }

    fn settle(&self, event: WorkerEvent) -> bool {
        let mut phase = self.phase();
        if *phase != Phase::Open {
            return false;
        }
        *phase = Phase::Settled;
        self.send(event);
        true
    }

    /// Emit DONE once; later calls are no-ops
    pub fn done(&self) -> bool {
        let mut phase = self.phase();
        if *phase == Phase::Closed {
            return false;
        }
        *phase = Phase::Closed;
        self.send(WorkerEvent::done());
        true
    }

    pub fn is_settled(&self) -> bool {
        *self.phase() != Phase::Open
    }

    pub fn is_closed(&self) -> bool {
        *self.phase() == Phase::Closed
    }
}

type KillHook = Box<dyn Fn() + Send>;

#[derive(Default)]
struct KillState {
    tripped: bool,
    hook: Option<KillHook>,
}

/// Destructive cancellation of a worker's current execution context.
///
/// The engine arms it with a hook that tears down whatever it is running;
/// tripping is permanent, so a hook armed after the trip fires immediately.
#[derive(Default)]
pub struct KillSwitch {
    state: Mutex<KillState>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, KillState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the teardown hook; returns false (after firing it) if already tripped
    pub fn arm(&self, hook: impl Fn() + Send + 'static) -> bool {
        let mut state = self.state();
        if state.tripped {
            hook();
            return false;
        }
        state.hook = Some(Box::new(hook));
        true
    }

    pub fn disarm(&self) {
        self.state().hook = None;
    }

    pub fn trip(&self) {
        let mut state = self.state();
        state.tripped = true;
        if let Some(hook) = state.hook.take() {
            hook();
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.state().tripped
    }
}

/// Everything an engine needs to report and cancel one run
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub sink: Arc<EventSink>,
    /// Cooperative flag raised by STOP or the deadline
    pub cancel: Arc<AtomicBool>,
    pub kill: Arc<KillSwitch>,
}

impl RunContext {
    pub fn new(
        sink: Arc<EventSink>,
        cancel: Arc<AtomicBool>,
        kill: Arc<KillSwitch>,
    ) -> Self {
        Self {
            run_id: RunId::new(),
            sink,
            cancel,
            kill,
        }
    }

    /// Standalone context with its own event channel
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Self::new(
            Arc::new(EventSink::new(tx)),
            Arc::new(AtomicBool::new(false)),
            Arc::new(KillSwitch::new()),
        );
        (ctx, rx)
    }
}
