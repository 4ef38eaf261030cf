//! Runner controller end to end: controller -> worker thread -> V8 -> display state

use crate::common::{controller, log_texts, setup_test_logging, wait_idle};
use dynnode_common::LogLevel;
use dynnode_sandbox::{ControllerConfig, DisplayState, RunnerController};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_main_scenario() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run(
        "function main(ctx){ return {ok:true, n: ctx.n+1}; }",
        r#"{"n":5}"#,
        2000
    ));
    assert!(controller.is_running());

    let state = wait_idle(&controller).await;
    let value: serde_json::Value = serde_json::from_str(&state.result_text).unwrap();
    assert_eq!(value, serde_json::json!({"ok": true, "n": 6}));
    assert_eq!(state.result_text, "{\n  \"ok\": true,\n  \"n\": 6\n}");
    assert!(state.error_text.is_empty());
}

#[tokio::test]
async fn test_boom_scenario() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run(
        "function main(){ console.log('before'); throw new Error(\"boom\"); }",
        "{}",
        2000
    ));
    let state = wait_idle(&controller).await;

    assert!(state.result_text.is_empty());
    assert!(state.error_text.starts_with("boom\n\n"));
    assert!(state.error_text.contains("Error: boom"));
    assert_eq!(log_texts(&state), vec!["before"]);
    assert!(state.panel().starts_with("[ERROR]\nboom"));
}

#[tokio::test]
async fn test_timeout_boundary() {
    setup_test_logging();
    let controller = controller();

    let start = Instant::now();
    assert!(controller.run("while (true) {}", "{}", 300));
    let state = wait_idle(&controller).await;

    assert_eq!(state.error_text, "timeout: 300ms");
    assert!(start.elapsed() < Duration::from_millis(300 + 1000));
    assert!(state.result_text.is_empty());

    // The worker survives a timeout and takes the next run.
    assert!(controller.run("return 'again';", "{}", 2000));
    let state = wait_idle(&controller).await;
    assert_eq!(state.result_text, "\"again\"");
}

#[tokio::test]
async fn test_timeout_is_clamped_up() {
    setup_test_logging();
    let controller = controller();

    let start = Instant::now();
    assert!(controller.run("while (true) {}", "{}", 10));
    let state = wait_idle(&controller).await;
    assert_eq!(state.error_text, "timeout: 300ms");
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_stop_scenario() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run(
        "async function main(ctx, api){ await api.sleep(200); log('late'); return 'late'; }",
        "{}",
        5000
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    controller.stop();

    let state = controller.state();
    assert!(!state.running);
    let last = state.logs.back().unwrap();
    assert_eq!(last.level, LogLevel::Warn);
    assert_eq!(last.text, "stopped (terminate worker)");

    // Nothing from the discarded worker may land afterwards.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let later = controller.state();
    assert!(later.result_text.is_empty());
    assert!(later.error_text.is_empty());
    assert_eq!(log_texts(&later), vec!["stopped (terminate worker)"]);
}

#[tokio::test]
async fn test_stop_interrupts_tight_loop_and_next_run_gets_fresh_worker() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run("while (true) {}", "{}", 10_000));
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.stop();
    assert!(!controller.is_running());

    assert!(controller.run("return 1 + 1;", "{}", 2000));
    let state = wait_idle(&controller).await;
    assert_eq!(state.result_text, "2");
    assert!(!log_texts(&state).contains(&"stopped (terminate worker)"));
}

#[tokio::test]
async fn test_log_bound() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run("for (let i = 0; i < 600; i++) console.log('line ' + i);", "{}", 5000));
    let state = wait_idle(&controller).await;

    assert_eq!(state.logs.len(), 500);
    assert_eq!(state.logs.front().unwrap().text, "line 100");
    assert_eq!(state.logs.back().unwrap().text, "line 599");
}

#[tokio::test]
async fn test_log_capacity_is_configurable() {
    setup_test_logging();
    let controller = RunnerController::new(ControllerConfig {
        log_capacity: 3,
        ..Default::default()
    });

    assert!(controller.run("for (let i = 0; i < 10; i++) log(i);", "{}", 2000));
    let state = wait_idle(&controller).await;
    assert_eq!(log_texts(&state), vec!["7", "8", "9"]);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run("log('x'); throw new Error('bad');", "{}", 2000));
    wait_idle(&controller).await;

    controller.reset();
    assert_eq!(controller.state(), DisplayState::default());
    controller.reset();
    assert_eq!(controller.state(), DisplayState::default());
}

#[tokio::test]
async fn test_run_is_guarded_while_running() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run(
        "async function main(ctx, api){ await api.sleep(150); return 'first'; }",
        "{}",
        2000
    ));
    assert!(!controller.run("return 'second';", "{}", 2000));

    let state = wait_idle(&controller).await;
    assert_eq!(state.result_text, "\"first\"");
}

#[tokio::test]
async fn test_run_resets_previous_output() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run("log('one'); return 1;", "{}", 2000));
    wait_idle(&controller).await;

    assert!(controller.run("return 2;", "{}", 2000));
    let state = wait_idle(&controller).await;
    assert!(state.logs.is_empty());
    assert_eq!(state.result_text, "2");
}

#[tokio::test]
async fn test_context_parse_failure() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run("log('never'); return 1;", "{\"n\": ", 2000));
    let state = wait_idle(&controller).await;

    assert!(state.logs.is_empty());
    assert!(state.result_text.is_empty());
    assert!(state.error_text.starts_with("context parse failure\n\n"));
}

#[tokio::test]
async fn test_circular_result() {
    setup_test_logging();
    let controller = controller();

    assert!(controller.run(
        "function main(){ const node = {id: 1}; node.next = node; return node; }",
        "",
        2000
    ));
    let state = wait_idle(&controller).await;
    let value: serde_json::Value = serde_json::from_str(&state.result_text).unwrap();
    assert_eq!(value, serde_json::json!({"id": 1, "next": "[Circular]"}));
}

#[tokio::test]
async fn test_sample_recipe_reads_default_response() {
    setup_test_logging();
    let controller = controller();

    let code = r#"
async function main(ctx, api) {
  const res = JSON.parse(userMap.get('api:API01'));
  info('status', res.body.status);
  api.checkStopped();
  return { doubled: res.body.items.map((x) => x * 2) };
}
"#;
    assert!(controller.run(code, r#"{"status":"ok","items":[1,2,3]}"#, 2000));
    let state = wait_idle(&controller).await;

    let value: serde_json::Value = serde_json::from_str(&state.result_text).unwrap();
    assert_eq!(value, serde_json::json!({"doubled": [2, 4, 6]}));
    assert!(log_texts(&state).contains(&"[userMap.get] api:API01 => string"));
    assert!(log_texts(&state).contains(&"status ok"));
}

#[tokio::test]
async fn test_independent_controllers() {
    setup_test_logging();
    let a = controller();
    let b = controller();

    assert!(a.run("while (true) {}", "{}", 10_000));
    assert!(b.run("return 'b';", "{}", 2000));

    let state_b = wait_idle(&b).await;
    assert_eq!(state_b.result_text, "\"b\"");
    assert!(a.is_running());

    a.stop();
    assert!(!a.is_running());
}

#[tokio::test]
async fn test_drop_terminates_worker() {
    setup_test_logging();
    let controller = controller();
    assert!(controller.run("while (true) {}", "{}", 10_000));
    let mut updates = controller.subscribe();
    drop(controller);

    // Sender side is gone with the controller.
    assert!(updates.changed().await.is_err());
}
