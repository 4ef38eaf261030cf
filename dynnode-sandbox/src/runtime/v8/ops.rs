//! Host ops backing the script bindings (`console`, `userMap`, `api`)
//!
//! Values cross the boundary as JSON text so numbers keep their exact
//! serde_json representation.

use crate::error::RunError;
use crate::execution::EventSink;
use crate::scratch::{js_typeof, ScratchMap};
use deno_core::{op2, Extension, OpState};
use deno_error::JsErrorBox;
use dynnode_common::LogLevel;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a sleeping script re-checks the cancel flag
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Longest single `api.sleep` honored (24h)
const MAX_SLEEP_MS: f64 = 86_400_000.0;

/// Per-run host state stored in the isolate's `OpState`
pub(crate) struct RunScope {
    pub sink: Arc<EventSink>,
    pub cancel: Arc<AtomicBool>,
    pub scratch: ScratchMap,
}

fn stopped() -> JsErrorBox {
    JsErrorBox::generic("stopped")
}

#[op2(fast)]
fn op_dyn_log(state: &mut OpState, #[string] level: String, #[string] text: String) {
    let level = level.parse::<LogLevel>().unwrap_or(LogLevel::Log);
    state.borrow::<RunScope>().sink.log(level, text);
}

/// Seed `api:API01` with `{ body: <context> }` serialized by the script
#[op2(fast)]
fn op_dyn_seed(state: &mut OpState, #[string] default_response: String) {
    state.borrow_mut::<RunScope>().scratch = ScratchMap::seeded(default_response);
}

#[op2(fast)]
fn op_dyn_map_put(
    state: &mut OpState,
    #[string] key: String,
    #[string] value_json: String,
) -> Result<(), JsErrorBox> {
    let value: Value = serde_json::from_str(&value_json)
        .map_err(|e| JsErrorBox::type_error(format!("userMap value is not serializable: {}", e)))?;
    let scope = state.borrow_mut::<RunScope>();
    scope.sink.log(LogLevel::Info, format!("[userMap.put] {}", key));
    scope.scratch.put(key, value);
    Ok(())
}

/// Stored value as JSON text, or an empty string when the key is absent
#[op2]
#[string]
fn op_dyn_map_get(state: &mut OpState, #[string] key: String) -> String {
    let scope = state.borrow::<RunScope>();
    let value = scope.scratch.get(&key);
    scope.sink.log(
        LogLevel::Info,
        format!("[userMap.get] {} => {}", key, js_typeof(value)),
    );
    value.map(Value::to_string).unwrap_or_default()
}

#[op2(fast)]
fn op_dyn_map_has(state: &mut OpState, #[string] key: String) -> bool {
    state.borrow::<RunScope>().scratch.has(&key)
}

#[op2(fast)]
fn op_dyn_map_del(state: &mut OpState, #[string] key: String) -> bool {
    state.borrow_mut::<RunScope>().scratch.del(&key)
}

#[op2(fast)]
fn op_dyn_map_clear(state: &mut OpState) {
    state.borrow_mut::<RunScope>().scratch.clear();
}

#[op2]
#[serde]
fn op_dyn_map_keys(state: &mut OpState) -> Vec<String> {
    state.borrow::<RunScope>().scratch.keys()
}

#[op2(fast)]
fn op_dyn_check_stopped(state: &mut OpState) -> Result<(), JsErrorBox> {
    if state.borrow::<RunScope>().cancel.load(Ordering::SeqCst) {
        return Err(stopped());
    }
    Ok(())
}

/// Cancellable sleep; rejects with "stopped" once the run is cancelled
#[op2(async)]
async fn op_dyn_sleep(state: Rc<RefCell<OpState>>, ms: f64) -> Result<(), JsErrorBox> {
    let cancel = state.borrow().borrow::<RunScope>().cancel.clone();
    let ms = if ms.is_finite() { ms.clamp(0.0, MAX_SLEEP_MS) } else { 0.0 };
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms as u64);

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(stopped());
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(());
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

#[op2(fast)]
fn op_dyn_result(state: &mut OpState, #[string] value_json: String) {
    let sink = state.borrow::<RunScope>().sink.clone();
    match serde_json::from_str::<Value>(&value_json) {
        Ok(value) => {
            sink.result(value);
        }
        Err(e) => {
            sink.fail(&RunError::script(
                format!("result is not serializable: {}", e),
                None,
            ));
        }
    }
}

/// Context text rejected by `JSON.parse`; the script is never compiled
#[op2(fast)]
fn op_dyn_context_error(state: &mut OpState, #[string] detail: String) {
    tracing::info!(error = %detail, "Context rejected");
    state
        .borrow::<RunScope>()
        .sink
        .fail(&RunError::ContextParse(detail));
}

#[op2]
fn op_dyn_error(
    state: &mut OpState,
    #[string] message: String,
    #[string] stack: Option<String>,
) {
    state
        .borrow::<RunScope>()
        .sink
        .fail(&RunError::script(message, stack));
}

/// Create the extension registering every runner op
pub fn create_runner_extension() -> Extension {
    let ops = vec![
        op_dyn_log(),
        op_dyn_seed(),
        op_dyn_map_put(),
        op_dyn_map_get(),
        op_dyn_map_has(),
        op_dyn_map_del(),
        op_dyn_map_clear(),
        op_dyn_map_keys(),
        op_dyn_check_stopped(),
        op_dyn_sleep(),
        op_dyn_result(),
        op_dyn_context_error(),
        op_dyn_error(),
    ];

    Extension {
        name: "dynnode_runner",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

/// Bootstrap evaluated as `(RUNNER_JS)(ops, code, contextText, requireMain)`.
///
/// Captures the ops and removes `Deno` and `__bootstrap` from the global
/// scope before any user code is compiled, so scripts only see the bindings
/// passed to them. `console` and `api` live in an enclosing scope and may be
/// shadowed by the script; `ctx`, `userMap`, `log`, `info`, `warn` and `error`
/// are parameters and cannot be redeclared at the top level.
pub(crate) const RUNNER_JS: &str = r##"async (ops, code, contextText, requireMain) => {
  delete globalThis.Deno;
  delete globalThis.__bootstrap;

  const toPlain = (root) => {
    const ancestors = [];
    const walk = (value) => {
      switch (typeof value) {
        case 'undefined':
          return undefined;
        case 'bigint':
          return `${value.toString()}n`;
        case 'function':
          return `[Function ${value.name || 'anonymous'}]`;
        case 'symbol':
          return value.toString();
        case 'number':
          return Number.isFinite(value) ? value : null;
        case 'string':
        case 'boolean':
          return value;
      }
      if (value === null) return null;
      if (ancestors.includes(value)) return '[Circular]';
      ancestors.push(value);
      try {
        if (typeof value.toJSON === 'function') return walk(value.toJSON());
        if (value instanceof Error) return `${value.name}: ${value.message}`;
        if (value instanceof Map) return walk(Object.fromEntries(value));
        if (value instanceof Set) return walk(Array.from(value));
        if (Array.isArray(value)) {
          return value.map((item) => {
            const out = walk(item);
            return out === undefined ? null : out;
          });
        }
        const out = {};
        for (const key of Object.keys(value)) {
          let item;
          try {
            item = walk(value[key]);
          } catch (_) {
            item = '[Unreadable]';
          }
          if (item !== undefined) out[key] = item;
        }
        return out;
      } finally {
        ancestors.pop();
      }
    };
    return walk(root);
  };

  const stringify = (value, indent) => {
    const plain = toPlain(value);
    return JSON.stringify(plain === undefined ? null : plain, null, indent);
  };

  const formatArgs = (args) =>
    args
      .map((arg) => {
        if (typeof arg === 'string') return arg;
        if (arg === undefined) return 'undefined';
        try {
          return stringify(arg, 2);
        } catch (_) {
          return String(arg);
        }
      })
      .join(' ');

  const emitter = (level) => (...args) => {
    ops.op_dyn_log(level, formatArgs(args));
  };

  const console = Object.freeze({
    log: emitter('log'),
    info: emitter('info'),
    warn: emitter('warn'),
    error: emitter('error'),
  });

  const userMap = Object.freeze({
    put: (key, value) => {
      ops.op_dyn_map_put(String(key), stringify(value));
      return value;
    },
    get: (key) => {
      const text = ops.op_dyn_map_get(String(key));
      return text === '' ? undefined : JSON.parse(text);
    },
    has: (key) => ops.op_dyn_map_has(String(key)),
    del: (key) => ops.op_dyn_map_del(String(key)),
    clear: () => ops.op_dyn_map_clear(),
    keys: () => ops.op_dyn_map_keys(),
  });

  const api = Object.freeze({
    userMap,
    checkStopped: () => ops.op_dyn_check_stopped(),
    sleep: (ms) => ops.op_dyn_sleep(Number(ms) || 0),
  });

  const entryMarker = Symbol('entry');
  const missingMain = () => new Error('entry function `main` is not defined');

  let ctx;
  try {
    ctx = JSON.parse(contextText);
  } catch (err) {
    ops.op_dyn_context_error(String(err && err.message));
    return;
  }

  try {
    ops.op_dyn_seed(JSON.stringify({ body: ctx }));

    const enclose = new Function(
      'console',
      'api',
      'return function (ctx, userMap, log, info, warn, error, __dynnodeEntry) {\n' +
        '"use strict";\n' +
        code +
        '\n;return { [__dynnodeEntry]: typeof main === "function" ? main : undefined };\n};',
    );
    const compiled = enclose(console, api);
    const completion = compiled(
      ctx,
      userMap,
      console.log,
      console.info,
      console.warn,
      console.error,
      entryMarker,
    );

    let value;
    if (completion !== null && typeof completion === 'object' && entryMarker in completion) {
      const entry = completion[entryMarker];
      if (typeof entry === 'function') {
        value = await entry(ctx, api);
      } else if (requireMain) {
        throw missingMain();
      } else {
        value = null;
      }
    } else if (requireMain) {
      throw missingMain();
    } else {
      value = await completion;
    }

    ops.op_dyn_result(stringify(value));
  } catch (err) {
    const present = err !== null && err !== undefined;
    const message = present && err.message !== undefined ? String(err.message) : String(err);
    const stack = present && typeof err.stack === 'string' ? err.stack : null;
    ops.op_dyn_error(message, stack);
  }
}"##;
