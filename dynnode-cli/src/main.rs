mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::RunOptions;
use config::AppConfig;
use dynnode_common::{NewPost, PostStatus};
use dynnode_sandbox::EntryConvention;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dynnode")]
#[command(about = "Run user script snippets in an isolated V8 worker")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Config file (default: ~/.config/dynnode/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script file against a JSON context
    Run {
        /// Script source file
        code_file: PathBuf,

        /// JSON context file (blank means `{}`)
        #[arg(short, long)]
        context: Option<PathBuf>,

        /// Deadline in milliseconds, clamped to 300..=10000
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Entry convention (auto, require-main)
        #[arg(long, value_parser = ["auto", "require-main"])]
        entry: Option<String>,
    },
    /// Manage stored posts
    Post {
        #[command(subcommand)]
        command: PostCommands,
    },
    /// Serve the worker protocol over stdin/stdout (JSON lines)
    Worker {
        /// Entry convention (auto, require-main)
        #[arg(long, value_parser = ["auto", "require-main"])]
        entry: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PostCommands {
    /// List posts, most recently updated first
    List,
    /// Print a post as JSON
    Show { id: String },
    /// Create a post from files
    Create {
        #[arg(long)]
        title: String,

        #[arg(long)]
        code_file: PathBuf,

        #[arg(long)]
        context_file: Option<PathBuf>,

        #[arg(long)]
        summary: Option<String>,

        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(long)]
        published: bool,
    },
    /// Replace a post's code and/or sample context
    Save {
        id: String,

        #[arg(long)]
        code_file: Option<PathBuf>,

        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Run a post's code against its sample context
    Run {
        id: String,

        #[arg(short, long)]
        timeout_ms: Option<u64>,

        #[arg(long, value_parser = ["auto", "require-main"])]
        entry: Option<String>,
    },
    /// Delete a post
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Run {
            code_file,
            context,
            timeout_ms,
            entry,
        } => {
            let code = commands::read_text(&code_file)?;
            let context_text = match context {
                Some(path) => commands::read_text(&path)?,
                None => String::new(),
            };
            let options = RunOptions {
                timeout_ms,
                entry: parse_entry(entry)?,
            };
            let state = commands::execute_run(&config, &code, &context_text, &options).await?;
            Ok(finish_run(&state))
        }
        Commands::Post { command } => run_post(&config, command).await,
        Commands::Worker { entry } => {
            commands::execute_worker(&config, parse_entry(entry)?).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_post(config: &AppConfig, command: PostCommands) -> Result<ExitCode> {
    let store = commands::open_store(config)?;

    match command {
        PostCommands::List => commands::execute_post_list(&store).await?,
        PostCommands::Show { id } => commands::execute_post_show(&store, &id).await?,
        PostCommands::Create {
            title,
            code_file,
            context_file,
            summary,
            tags,
            published,
        } => {
            let mut input = NewPost::new(title, commands::read_text(&code_file)?);
            if let Some(path) = context_file {
                input = input.with_sample_ctx(commands::read_text(&path)?);
            }
            input.summary = summary;
            input.tags = tags;
            if published {
                input.status = PostStatus::Published;
            }
            commands::execute_post_create(&store, input).await?
        }
        PostCommands::Save {
            id,
            code_file,
            context_file,
        } => {
            let code = code_file.as_deref().map(commands::read_text).transpose()?;
            let context_text = context_file
                .as_deref()
                .map(commands::read_text)
                .transpose()?;
            commands::execute_post_save(&store, &id, code, context_text).await?
        }
        PostCommands::Run {
            id,
            timeout_ms,
            entry,
        } => {
            let options = RunOptions {
                timeout_ms,
                entry: parse_entry(entry)?,
            };
            let state = commands::execute_post_run(config, &store, &id, &options).await?;
            return Ok(finish_run(&state));
        }
        PostCommands::Delete { id } => commands::execute_post_delete(&store, &id).await?,
    }

    Ok(ExitCode::SUCCESS)
}

fn parse_entry(entry: Option<String>) -> Result<Option<EntryConvention>> {
    entry
        .map(|e| e.parse::<EntryConvention>().map_err(anyhow::Error::msg))
        .transpose()
}

/// Exit code 1 when the run ended in an error
fn finish_run(state: &dynnode_sandbox::DisplayState) -> ExitCode {
    commands::print_outcome(state);
    if state.error_text.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Logs go to stderr only; stdout carries run output or the worker protocol.
fn init_tracing(verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "dynnode={},dynnode_cli={},dynnode_sandbox={},dynnode_common={}",
                    log_level, log_level, log_level, log_level
                ))
            }),
        )
        .init();

    guard
}
