//! V8 JavaScript engine using deno_core
//!
//! Every run gets a fresh `JsRuntime` on the calling (worker) thread. A
//! watchdog thread enforces the deadline and a near-heap-limit callback
//! enforces the memory ceiling; both end the run with V8's
//! `terminate_execution`, which also interrupts non-yielding loops.

mod ops;

use crate::error::RunError;
use crate::execution::RunContext;
use crate::limits::ResourceLimits;
use crate::runtime::{normalize_context, Engine, EntryConvention};
use crate::scratch::ScratchMap;
use async_trait::async_trait;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use dynnode_common::{clamp_timeout_ms, RunRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::Instrument;

pub use ops::create_runner_extension;
use ops::{RunScope, RUNNER_JS};

/// V8 JavaScript engine
pub struct V8Engine {
    limits: ResourceLimits,
    entry: EntryConvention,
}

impl V8Engine {
    pub fn new() -> Self {
        Self {
            limits: ResourceLimits::default(),
            entry: EntryConvention::default(),
        }
    }

    /// Create V8 engine with custom resource limits
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            limits,
            entry: EntryConvention::default(),
        }
    }

    pub fn with_entry(mut self, entry: EntryConvention) -> Self {
        self.entry = entry;
        self
    }

    pub fn entry(&self) -> EntryConvention {
        self.entry
    }

    fn create_runtime(&self, ctx: &RunContext) -> JsRuntime {
        let mut options = RuntimeOptions {
            extensions: vec![create_runner_extension()],
            ..Default::default()
        };
        if let Some((initial, max)) = self.limits.heap_limits() {
            options.create_params = Some(v8::CreateParams::default().heap_limits(initial, max));
        }

        let mut runtime = JsRuntime::new(options);
        runtime.op_state().borrow_mut().put(RunScope {
            sink: ctx.sink.clone(),
            cancel: ctx.cancel.clone(),
            scratch: ScratchMap::new(),
        });
        runtime
    }

    fn bootstrap(&self, code: &str, context_text: &str) -> String {
        format!(
            "({})(Deno.core.ops, {}, {}, {});",
            RUNNER_JS,
            js_string(code),
            js_string(context_text),
            self.entry == EntryConvention::RequireMain
        )
    }

    async fn run_isolate(&self, request: &RunRequest, context_text: &str, ctx: &RunContext) {
        let mut runtime = self.create_runtime(ctx);

        let heap_state = Box::new(HeapLimitState {
            handle: runtime.v8_isolate().thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        if self.limits.max_memory_bytes.is_some() {
            runtime.v8_isolate().add_near_heap_limit_callback(
                near_heap_limit_callback,
                &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
            );
        }

        let kill_handle = runtime.v8_isolate().thread_safe_handle();
        if !ctx.kill.arm(move || {
            kill_handle.terminate_execution();
        }) {
            tracing::debug!("Worker terminated before the isolate started");
        }

        let watchdog = Watchdog::start(
            runtime.v8_isolate().thread_safe_handle(),
            clamp_timeout_ms(request.timeout_ms),
            ctx.clone(),
        );

        let script = self.bootstrap(&request.code, context_text);
        let outcome = match runtime.execute_script("<dynnode>", script) {
            Ok(_) => runtime
                .run_event_loop(PollEventLoopOptions::default())
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        watchdog.disarm();
        ctx.kill.disarm();
        drop(runtime);

        if heap_state.triggered.load(Ordering::SeqCst) {
            tracing::warn!("Heap limit reached");
            ctx.sink.fail(&RunError::MemoryLimit);
        }
        drop(heap_state);

        match outcome {
            Err(message) if !ctx.sink.is_settled() => {
                tracing::debug!(error = %message, "Engine error outside script handlers");
                ctx.sink.fail(&RunError::script(message, None));
            }
            Ok(()) if !ctx.sink.is_settled() => {
                ctx.sink
                    .fail(&RunError::script("script ended without settling", None));
            }
            _ => {}
        }
    }
}

impl Default for V8Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Engine for V8Engine {
    async fn execute(&self, request: RunRequest, ctx: RunContext) {
        let span = tracing::info_span!(
            "run",
            run_id = %ctx.run_id,
            timeout_ms = request.timeout_ms,
            code_len = request.code.len()
        );

        async {
            let start = Instant::now();
            let context_text = normalize_context(&request.context_text);
            self.run_isolate(&request, context_text, &ctx).await;
            tracing::debug!(duration_ms = start.elapsed().as_millis() as u64, "Run finished");
        }
        .instrument(span)
        .await
    }

    fn name(&self) -> &str {
        "v8"
    }
}

/// JSON string literal, which is also a valid JS string literal
fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_owned()).to_string()
}

/// Wall-clock deadline for one run.
///
/// On expiry: raise the cancel flag, settle with a timeout ERROR, emit DONE,
/// then terminate the isolate.
struct Watchdog {
    cancel_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn start(handle: v8::IsolateHandle, timeout_ms: u64, ctx: RunContext) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let timeout = Duration::from_millis(timeout_ms);

        let thread = std::thread::Builder::new()
            .name("dynnode-watchdog".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                    tracing::warn!(run_id = %ctx.run_id, timeout_ms, "Run deadline expired");
                    ctx.cancel.store(true, Ordering::SeqCst);
                    ctx.sink.fail(&RunError::Timeout { timeout_ms });
                    ctx.sink.done();
                    handle.terminate_execution();
                }
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn watchdog thread");
                None
            }
        };

        Self { cancel_tx, thread }
    }

    /// Stop the timer and wait for the thread so it never outlives the isolate
    fn disarm(mut self) {
        let _ = self.cancel_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// State for the near-heap-limit callback
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates execution once and grants 1 MiB so the termination can unwind
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` is the boxed HeapLimitState from `run_isolate`, which is
    // dropped only after the runtime that owns this callback.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}
