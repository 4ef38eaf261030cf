//! Common test utilities shared across integration tests

use dynnode_sandbox::{ControllerConfig, DisplayState, RunnerController};
use std::time::Duration;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn controller() -> RunnerController {
    RunnerController::new(ControllerConfig::default())
}

/// Wait until the controller leaves RUNNING
pub async fn wait_idle(controller: &RunnerController) -> DisplayState {
    let mut updates = controller.subscribe();
    let finished = tokio::time::timeout(Duration::from_secs(15), updates.wait_for(|s| !s.running))
        .await
        .expect("run did not finish in time")
        .expect("controller state channel closed");
    finished.clone()
}

pub fn log_texts(state: &DisplayState) -> Vec<&str> {
    state.logs.iter().map(|entry| entry.text.as_str()).collect()
}
