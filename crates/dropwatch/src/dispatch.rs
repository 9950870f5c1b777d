//! Collaborators invoked once a file is ready.
//!
//! The watcher does not know what "ingesting" a file means. Callers plug in
//! a [`ReadyHandler`] that does the work and, optionally, a [`Notifier`]
//! that is told about each successful ingest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Receives the path of every file whose size has settled.
///
/// Called concurrently from several workers, for different paths.
pub trait ReadyHandler: Send + Sync {
    fn on_ready(&self, path: &Path) -> anyhow::Result<()>;
}

impl<F> ReadyHandler for F
where
    F: Fn(&Path) -> anyhow::Result<()> + Send + Sync,
{
    fn on_ready(&self, path: &Path) -> anyhow::Result<()> {
        self(path)
    }
}

/// Best-effort sink for completion messages.
pub trait Notifier: Send + Sync {
    fn send(&self, message: &str);
}

impl<F> Notifier for F
where
    F: Fn(&str) + Send + Sync,
{
    fn send(&self, message: &str) {
        self(message)
    }
}

/// Human-readable message sent after a file was handled successfully.
pub fn completion_message(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("🎉 Imported: 【{}】", name)
}

/// Identity of one version of a file's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl Fingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Records which version of each path has been handed to the handler, so
/// duplicate events for an unchanged file dispatch only once.
#[derive(Debug, Default)]
pub struct ReadyLedger {
    dispatched: Mutex<HashMap<PathBuf, Fingerprint>>,
}

impl ReadyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `fingerprint` for `path`. Returns false if that exact version
    /// was already claimed.
    pub fn claim(&self, path: &Path, fingerprint: Fingerprint) -> bool {
        let mut dispatched = self
            .dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if dispatched.get(path) == Some(&fingerprint) {
            return false;
        }
        dispatched.insert(path.to_path_buf(), fingerprint);
        true
    }

    /// Drop a claim after the handler failed, so a later event can retry.
    pub fn release(&self, path: &Path, fingerprint: Fingerprint) {
        let mut dispatched = self
            .dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if dispatched.get(path) == Some(&fingerprint) {
            dispatched.remove(path);
        }
    }

    /// Forget every claim for `path`, typically because it was removed or
    /// moved away. A later file at the same path dispatches again even if
    /// its length and mtime match the old one.
    pub fn forget(&self, path: &Path) {
        self.dispatched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path);
    }
}
