//! Per-path event debouncing.
//!
//! Editors, downloaders and copy tools emit bursts of events for a single
//! file. The [`Debouncer`] lets the first event for a path through and
//! suppresses the rest until the window has passed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default debounce window
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Remembers when each path last had an event accepted.
///
/// Entries are never evicted; the map is bounded by the set of paths seen
/// during one watch session.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Mutex<HashMap<PathBuf, Instant>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true if an event for `path` should propagate.
    pub fn accept(&self, path: &Path) -> bool {
        self.accept_at(path, Instant::now())
    }

    fn accept_at(&self, path: &Path, now: Instant) -> bool {
        let mut last_accepted = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(last) = last_accepted.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }

        last_accepted.insert(path.to_path_buf(), now);
        true
    }

    /// Number of distinct paths that have had an event accepted.
    pub fn tracked_paths(&self) -> usize {
        self.last_accepted
            .lock()
            .map(|map| map.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::with_defaults()
    }
}
