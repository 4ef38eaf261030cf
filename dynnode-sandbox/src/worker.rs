//! Sandbox worker: one OS thread executing runs one at a time
//!
//! The thread owns a current-thread tokio runtime and whatever the engine
//! builds per run (a V8 isolate). Events flow back over an unbounded channel
//! whose only sender lives on the worker thread, so the receiver observing a
//! closed channel means the worker is gone.

use crate::error::RunError;
use crate::execution::{EventSink, KillSwitch, RunContext};
use crate::runtime::Engine;
use dynnode_common::{RunRequest, WorkerCommand, WorkerEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(1);

/// Handle to a running worker thread
pub struct Worker {
    id: usize,
    commands: Option<std_mpsc::Sender<RunRequest>>,
    cancel: Arc<AtomicBool>,
    kill: Arc<KillSwitch>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker thread reporting to `events`
    pub fn spawn(
        engine: Arc<dyn Engine>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<Self> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let (commands, command_rx) = std_mpsc::channel::<RunRequest>();
        let cancel = Arc::new(AtomicBool::new(false));
        let kill = Arc::new(KillSwitch::new());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let thread = {
            let cancel = cancel.clone();
            let kill = kill.clone();
            std::thread::Builder::new()
                .name(format!("dynnode-worker-{}", id))
                .spawn(move || {
                    tracing::debug!(worker_id = id, engine = engine.name(), "Worker started");

                    while let Ok(request) = command_rx.recv() {
                        if kill.is_tripped() {
                            break;
                        }
                        cancel.store(false, Ordering::SeqCst);

                        let sink = Arc::new(EventSink::new(events.clone()));
                        let ctx = RunContext::new(sink.clone(), cancel.clone(), kill.clone());
                        tracing::debug!(worker_id = id, run_id = %ctx.run_id, "Run accepted");

                        rt.block_on(engine.execute(request, ctx));
                        sink.done();
                    }

                    tracing::debug!(worker_id = id, "Worker exiting");
                })?
        };

        Ok(Self {
            id,
            commands: Some(commands),
            cancel,
            kill,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Deliver a protocol command. STOP only raises the cooperative flag.
    pub fn send(&self, command: WorkerCommand) -> Result<(), RunError> {
        match command {
            WorkerCommand::Run(request) => self.run(request),
            WorkerCommand::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    pub fn run(&self, request: RunRequest) -> Result<(), RunError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| RunError::Transport("worker terminated".into()))?;
        commands
            .send(request)
            .map_err(|_| RunError::Transport("worker thread exited".into()))
    }

    /// Advisory cancellation of the current run
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Close the inbox without interrupting; queued runs still complete and
    /// the event channel closes once the thread exits.
    pub fn close(mut self) {
        self.commands = None;
        self.thread = None;
    }

    /// Destroy the worker: interrupt whatever runs in it and close its inbox.
    ///
    /// Does not wait for the thread; it unwinds on its own once V8 has been
    /// terminated.
    pub fn terminate(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.commands.is_none() {
            return;
        }
        tracing::debug!(worker_id = self.id, "Terminating worker");
        self.cancel.store(true, Ordering::SeqCst);
        self.kill.trip();
        self.commands = None;
        self.thread = None;
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}
