//! dropwatch: watch directories and dispatch files once they are fully written
//!
//! This crate provides the building blocks of a drop-folder ingester:
//! - Recursive directory registration with one OS watch per directory
//! - Per-path event debouncing
//! - A bounded worker pool that waits for a file's size to settle
//! - Coordinated shutdown of every router and worker thread

use std::path::PathBuf;

pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod event;
pub mod stability;
pub mod watch;

// Re-export main types
pub use config::Config;
pub use debounce::Debouncer;
pub use dispatch::{completion_message, Notifier, ReadyHandler};
pub use event::{FileOp, RawEvent};
pub use stability::{is_file_stable, Stability};
pub use watch::{WatchManager, WatchStats};

/// Errors surfaced by the watch subsystem
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to watch directory: {0}")]
    Notify(#[from] notify::Error),

    #[error("Failed to walk directory tree: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Failed to read path: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Watch manager is shutting down")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] Box<figment::Error>),
}

pub type Result<T> = std::result::Result<T, WatchError>;
