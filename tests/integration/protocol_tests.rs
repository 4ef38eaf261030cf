//! Worker protocol: event sequence shape and wire format

use crate::common::setup_test_logging;
use assert_matches::assert_matches;
use dynnode_common::{decode_line, encode_line, CodecError, RunRequest, WorkerCommand, WorkerEvent};
use dynnode_sandbox::{V8Engine, Worker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn collect_run(
    worker: &Worker,
    rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    code: &str,
    context: &str,
    timeout_ms: u64,
) -> Vec<WorkerEvent> {
    worker
        .send(WorkerCommand::Run(RunRequest::new(code, context, timeout_ms)))
        .unwrap();

    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(15), rx.recv())
            .await
            .expect("worker went quiet")
            .expect("worker disconnected");
        let done = event.is_done();
        events.push(event);
        if done {
            return events;
        }
    }
}

/// `LOG* (RESULT|ERROR)? DONE`
fn assert_shape(events: &[WorkerEvent]) {
    let (last, body) = events.split_last().expect("no events");
    assert!(last.is_done(), "last event must be DONE: {:?}", events);

    let terminal: Vec<_> = body.iter().filter(|e| e.is_terminal()).collect();
    assert!(terminal.len() <= 1, "more than one outcome: {:?}", events);
    if let Some(pos) = body.iter().position(|e| e.is_terminal()) {
        assert_eq!(pos, body.len() - 1, "outcome must directly precede DONE");
    }
    assert!(body.iter().all(|e| !e.is_done()), "DONE emitted twice");
}

#[tokio::test]
async fn test_event_shape_across_outcomes() {
    setup_test_logging();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = Worker::spawn(Arc::new(V8Engine::new()), tx).unwrap();

    let cases: &[(&str, &str, u64)] = &[
        ("log(1); log(2); return 3;", "{}", 2000),
        ("function main(){ log('a'); throw new Error('x'); }", "{}", 2000),
        ("log('spin'); while (true) {}", "{}", 300),
        ("return 1;", "not json", 2000),
        ("const x = 1;", "", 2000),
        ("async function main(ctx, api){ await api.sleep(2000); }", "{}", 300),
        ("throw { toString() { return 'odd'; } };", "{}", 2000),
    ];

    for (code, context, timeout_ms) in cases {
        let events = collect_run(&worker, &mut rx, code, context, *timeout_ms).await;
        assert_shape(&events);
    }
}

#[tokio::test]
async fn test_logs_keep_emission_order() {
    setup_test_logging();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = Worker::spawn(Arc::new(V8Engine::new()), tx).unwrap();

    let events = collect_run(
        &worker,
        &mut rx,
        "async function main(ctx, api){ for (let i = 0; i < 5; i++) { log(i); await api.sleep(1); } }",
        "{}",
        2000,
    )
    .await;

    let texts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Log(entry) => Some(entry.text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_scratch_seed_matches_stringified_context() {
    setup_test_logging();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = Worker::spawn(Arc::new(V8Engine::new()), tx).unwrap();

    let deep = format!("{}{}", "[".repeat(300), "]".repeat(300));
    let contexts = [
        r#"{"n":5}"#,
        r#"{ "nested": { "list": [1, 2.5, "three", null, true] }, "unicode": "é😀" }"#,
        "[1,2,3]",
        "\"just a string\"",
        "  ",
        r#"{"huge": 1e400, "tiny": -1e400}"#,
        deep.as_str(),
    ];

    for context in contexts {
        let events = collect_run(
            &worker,
            &mut rx,
            "return userMap.get('api:API01') === JSON.stringify({ body: ctx });",
            context,
            2000,
        )
        .await;
        assert!(
            events.iter().any(|e| matches!(
                e,
                WorkerEvent::Result { value, .. } if value == &serde_json::json!(true)
            )),
            "seed mismatch for {}: {:?}",
            context,
            events
        );
    }
}

#[test]
fn test_wire_format() {
    let run = WorkerCommand::Run(RunRequest::new("return 1;", "{}", 99_999));
    let line = encode_line(&run).unwrap();
    let json: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"kind": "RUN", "code": "return 1;", "contextText": "{}", "timeoutMs": 10000})
    );
    assert_eq!(
        decode_line::<WorkerCommand>(r#"{"kind":"STOP"}"#).unwrap(),
        WorkerCommand::Stop
    );

    let error = WorkerEvent::error("boom", Some("Error: boom".into()));
    let json: serde_json::Value = serde_json::from_str(&encode_line(&error).unwrap()).unwrap();
    assert_eq!(json["kind"], "ERROR");
    assert_eq!(json["stackTrace"], "Error: boom");
    assert!(json["timestamp"].is_string());

    let done: serde_json::Value =
        serde_json::from_str(&encode_line(&WorkerEvent::done()).unwrap()).unwrap();
    assert_eq!(done["kind"], "DONE");

    assert_matches!(decode_line::<WorkerCommand>("   "), Err(CodecError::Blank));
    assert_matches!(
        decode_line::<WorkerCommand>(r#"{"kind":"JUMP"}"#),
        Err(CodecError::Malformed(_))
    );
}
