//! dropwatch: watch drop folders and hand off files once they are fully written.
//!
//! This CLI provides:
//! - `watch`: run the watch manager until Ctrl+C
//! - `check`: run a one-off stability check on a file

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dropwatch::config::{Config, CONFIG_FILE_NAME};
use dropwatch::stability::{file_stability, Stability};
use dropwatch::{Notifier, ReadyHandler, WatchManager};
use dropwatch_cli::{CommandHandler, LogHandler, TelegramNotifier};

/// Exit codes for the CLI
///
/// - 0: Success (for `check`: the file is stable)
/// - 1: Negative result (for `check`: the file is still changing or missing)
/// - 2: Error (invalid input, unreadable config, watch failure, etc.)
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const NEGATIVE: u8 = 1;
    pub const ERROR: u8 = 2;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Watch directories and dispatch files once they have finished being written
#[derive(Parser)]
#[command(name = "dropwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories until interrupted
    Watch {
        /// Directories to watch (added to the configured roots)
        roots: Vec<PathBuf>,

        /// Config file (defaults to ./dropwatch.toml, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Only watch the given directories, not their subdirectories
        #[arg(long)]
        no_recursive: bool,

        /// Command to run for every ready file (the file path is appended)
        #[arg(long)]
        exec: Option<String>,
    },

    /// Check whether a file's size has stopped changing
    Check {
        /// File to check
        file: PathBuf,

        /// Milliseconds between size samples
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Number of size samples that must agree
        #[arg(long, default_value = "2")]
        checks: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, cli.format) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if cli.format == OutputFormat::Json {
                let error_json = serde_json::json!({
                    "error": "CommandFailed",
                    "message": format!("{:#}", e),
                });
                eprintln!("{}", error_json);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn run(command: Commands, format: OutputFormat) -> Result<u8> {
    match command {
        Commands::Watch {
            roots,
            config,
            workers,
            no_recursive,
            exec,
        } => cmd_watch(roots, config.as_deref(), workers, no_recursive, exec),
        Commands::Check {
            file,
            interval_ms,
            checks,
        } => cmd_check(&file, Duration::from_millis(interval_ms), checks, format),
    }
}

/// Resolve which config file to read.
///
/// An explicit `--config` wins, then `./dropwatch.toml`, then
/// `<config dir>/dropwatch/dropwatch.toml`.
fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("dropwatch").join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}

fn cmd_watch(
    roots: Vec<PathBuf>,
    config_file: Option<&Path>,
    workers: Option<usize>,
    no_recursive: bool,
    exec: Option<String>,
) -> Result<u8> {
    let path = config_path(config_file);
    if config_file.is_some() && !path.exists() {
        anyhow::bail!("Config file not found: {}", path.display());
    }
    let mut config = Config::try_load_file(&path)?;

    config.roots.extend(roots);
    if config.roots.is_empty() {
        anyhow::bail!(
            "No directories to watch. Pass them as arguments or set `roots` in the config."
        );
    }
    config.roots = config
        .roots
        .iter()
        .map(|root| {
            root.canonicalize()
                .with_context(|| format!("Failed to resolve {}", root.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    config.roots.sort();
    config.roots.dedup();

    if let Some(workers) = workers {
        config.workers = workers;
    }
    if no_recursive {
        config.recursive = false;
    }
    if let Some(exec) = exec {
        let mut parts = exec.split_whitespace().map(str::to_string);
        config.handler.command = parts.next();
        config.handler.args = parts.collect();
    }

    let handler: Arc<dyn ReadyHandler> = match CommandHandler::from_config(&config.handler) {
        Some(handler) => {
            tracing::info!("Ready files are passed to `{}`", handler.program());
            Arc::new(handler)
        }
        None => Arc::new(LogHandler),
    };

    let notifier: Option<Arc<dyn Notifier>> = match TelegramNotifier::from_config(&config.telegram)
    {
        Some(notifier) => Some(Arc::new(notifier)),
        None => {
            tracing::warn!("Telegram is not configured; completion messages will be skipped");
            None
        }
    };

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let manager = WatchManager::start(&config, handler, notifier)
        .context("Failed to start watching")?;

    tracing::info!(
        "Watching {} directories with {} workers (Ctrl+C to stop)",
        manager.watch_count(),
        manager.worker_count()
    );

    // Blocks until Ctrl+C; a dropped sender also means stop.
    let _ = stop_rx.recv();

    tracing::info!("Shutting down...");
    let stats = manager.stop();
    tracing::info!(
        "Stopped: {} events received, {} debounced, {} files ready, {} handler failures",
        stats.events_received,
        stats.events_debounced,
        stats.files_ready,
        stats.handler_failures
    );

    Ok(exit_codes::SUCCESS)
}

fn cmd_check(file: &Path, interval: Duration, checks: u32, format: OutputFormat) -> Result<u8> {
    if checks == 0 {
        anyhow::bail!("--checks must be at least 1");
    }
    let meta = std::fs::metadata(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if !meta.is_file() {
        anyhow::bail!("Not a regular file: {}", file.display());
    }

    let result = file_stability(file, interval, checks);
    let (label, size, code) = match result {
        Stability::Stable { len } => ("stable", Some(len), exit_codes::SUCCESS),
        Stability::Changing => ("changing", None, exit_codes::NEGATIVE),
        Stability::Missing | Stability::Cancelled => ("missing", None, exit_codes::NEGATIVE),
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "file": file.display().to_string(),
                "status": label,
                "size": size,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match size {
            Some(len) => println!("{}: {} ({} bytes)", file.display(), label, len),
            None => println!("{}: {}", file.display(), label),
        },
    }

    Ok(code)
}
