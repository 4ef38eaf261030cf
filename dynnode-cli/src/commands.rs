//! CLI command implementations

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use dynnode_common::{CodeFields, FileStore, NewPost, PostStatus, PostStore};
use dynnode_sandbox::{
    render, stdio, DisplayState, EntryConvention, RunnerController, V8Engine,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Options shared by `run` and `post run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub timeout_ms: Option<u64>,
    pub entry: Option<EntryConvention>,
}

/// Run a script through a controller and print what a host would display.
///
/// Returns the final display state; Ctrl-C stops the run.
pub async fn execute_run(
    config: &AppConfig,
    code: &str,
    context_text: &str,
    options: &RunOptions,
) -> Result<DisplayState> {
    let mut controller_config = config.runner.controller_config();
    if let Some(entry) = options.entry {
        controller_config.entry = entry;
    }
    let timeout_ms = options
        .timeout_ms
        .unwrap_or_else(|| config.runner.timeout_ms());

    let controller = RunnerController::new(controller_config);
    let mut updates = controller.subscribe();

    if !controller.run(code, context_text, timeout_ms) {
        let state = controller.state();
        bail!("run did not start: {}", state.error_text);
    }

    tokio::select! {
        finished = updates.wait_for(|state| !state.running) => {
            finished.context("controller went away")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping run");
            controller.stop();
        }
    }

    let state = controller.state();
    debug!(logs = state.logs.len(), "Run complete");
    Ok(state)
}

/// Print logs then the output panel
pub fn print_outcome(state: &DisplayState) {
    for entry in &state.logs {
        println!("{}", render::format_log_line(entry));
    }
    let panel = state.panel();
    if !panel.is_empty() {
        if !state.logs.is_empty() {
            println!();
        }
        println!("{}", panel);
    }
}

pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn open_store(config: &AppConfig) -> Result<FileStore> {
    let path = config.store_path()?;
    debug!(path = %path.display(), "Opening post store");
    Ok(FileStore::new(path))
}

pub async fn execute_post_list(store: &dyn PostStore) -> Result<()> {
    let posts = store.list().await?;
    if posts.is_empty() {
        println!("No posts");
        return Ok(());
    }
    for post in posts {
        let status = match post.status {
            PostStatus::Draft => "DRAFT",
            PostStatus::Published => "PUBLISHED",
        };
        println!(
            "{}  {:<9}  {}  {}",
            post.id,
            status,
            post.updated_at.format("%Y-%m-%d %H:%M"),
            post.title
        );
    }
    Ok(())
}

pub async fn execute_post_show(store: &dyn PostStore, id: &str) -> Result<()> {
    match store.get(id).await? {
        Some(post) => {
            println!("{}", serde_json::to_string_pretty(&post)?);
            Ok(())
        }
        None => bail!("post not found: {}", id),
    }
}

pub async fn execute_post_create(store: &dyn PostStore, input: NewPost) -> Result<()> {
    let post = store.create(input).await?;
    info!(id = %post.id, "Post created");
    println!("{}", post.id);
    Ok(())
}

/// Replace the code and/or context of a post, keeping whichever is not given
pub async fn execute_post_save(
    store: &dyn PostStore,
    id: &str,
    code: Option<String>,
    context_text: Option<String>,
) -> Result<()> {
    if code.is_none() && context_text.is_none() {
        bail!("nothing to save: pass --code-file and/or --context-file");
    }
    let current = store.get_code(id).await?;
    let fields = CodeFields {
        code: code.unwrap_or(current.code),
        context_text: context_text.unwrap_or(current.context_text),
    };
    store.save_code(id, fields).await?;
    println!("saved {}", id);
    Ok(())
}

pub async fn execute_post_run(
    config: &AppConfig,
    store: &dyn PostStore,
    id: &str,
    options: &RunOptions,
) -> Result<DisplayState> {
    let fields = store.get_code(id).await?;
    execute_run(config, &fields.code, &fields.context_text, options).await
}

pub async fn execute_post_delete(store: &dyn PostStore, id: &str) -> Result<()> {
    let removed = store.delete(id).await?;
    if removed == 0 {
        bail!("post not found: {}", id);
    }
    println!("deleted {}", id);
    Ok(())
}

/// Serve the worker protocol on stdin/stdout
pub async fn execute_worker(config: &AppConfig, entry: Option<EntryConvention>) -> Result<()> {
    let engine = V8Engine::with_limits(config.runner.limits())
        .with_entry(entry.unwrap_or(config.runner.entry));
    info!(entry = %engine.entry(), "Serving worker protocol on stdio");
    stdio::serve(Arc::new(engine), tokio::io::stdin(), tokio::io::stdout()).await
}
