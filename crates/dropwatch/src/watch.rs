//! Directory watching and ready-file dispatch.
//!
//! A [`WatchManager`] owns one non-recursive OS watch per directory. Each
//! watch feeds a router thread that debounces events and pushes them onto a
//! shared bounded queue. A fixed pool of workers drains the queue, waits for
//! each file's size to settle, and hands it to the [`ReadyHandler`].
//!
//! ```text
//! notify watch ─▶ router ─▶ debouncer ─▶ bounded queue ─▶ worker ─▶ handler ─▶ notifier
//! ```
//!
//! Shutdown closes a broadcast stop channel, closes every watch, drops the
//! queue sender and joins every thread.
//!
//! # Example
//! ```ignore
//! let handler = Arc::new(|path: &Path| -> anyhow::Result<()> {
//!     println!("ready: {}", path.display());
//!     Ok(())
//! });
//! let manager = WatchManager::start(&config, handler, None)?;
//! // ... wait for Ctrl+C ...
//! manager.stop();
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use ignore::WalkBuilder;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::debounce::Debouncer;
use crate::dispatch::{completion_message, Fingerprint, Notifier, ReadyHandler, ReadyLedger};
use crate::event::{FileOp, RawEvent};
use crate::stability::{check_stability, Stability};
use crate::{Result, WatchError};

/// Counters describing what the pipeline has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    /// Events received from the OS watches
    pub events_received: u64,
    /// Events suppressed by the debouncer
    pub events_debounced: u64,
    /// Events pushed onto the shared queue
    pub events_queued: u64,
    /// Files handed to the ready handler successfully
    pub files_ready: u64,
    /// Ready handler invocations that returned an error
    pub handler_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    events_debounced: AtomicU64,
    events_queued: AtomicU64,
    files_ready: AtomicU64,
    handler_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WatchStats {
        WatchStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_debounced: self.events_debounced.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            files_ready: self.files_ready.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// One registered directory: its OS watch and the router draining it.
struct WatchedDirectory {
    watcher: RecommendedWatcher,
    router: JoinHandle<()>,
}

/// Registered directories plus the producer side of the shared queue.
///
/// `None` once shutdown has begun, which makes late registrations fail.
struct Registry {
    dirs: HashMap<PathBuf, WatchedDirectory>,
    queue_tx: Sender<RawEvent>,
}

/// State shared between the manager, its routers and its workers.
struct Shared {
    registry: Mutex<Option<Registry>>,
    debouncer: Debouncer,
    ledger: ReadyLedger,
    stop_rx: Receiver<()>,
    counters: Counters,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Option<Registry>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add_dir(self: &Arc<Self>, dir: &Path) -> Result<()> {
        let mut guard = self.registry();
        let registry = guard.as_mut().ok_or(WatchError::Stopped)?;

        // Registry keys are canonical so one directory maps to one watch
        // however it was spelled.
        let dir = dir.canonicalize()?;
        let dir = dir.as_path();

        if registry.dirs.contains_key(dir) {
            return Ok(());
        }

        if !std::fs::metadata(dir)?.is_dir() {
            return Err(WatchError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }

        let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The router is gone once the manager shuts down.
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let router = EventRouter {
            dir: dir.to_path_buf(),
            events: raw_rx,
            queue_tx: registry.queue_tx.clone(),
            stop_rx: self.stop_rx.clone(),
            shared: Arc::clone(self),
        };
        let router = thread::Builder::new()
            .name("dropwatch-router".to_string())
            .spawn(move || router.run())?;

        registry
            .dirs
            .insert(dir.to_path_buf(), WatchedDirectory { watcher, router });
        info!("Watching directory: {}", dir.display());
        Ok(())
    }

    fn add_dir_recursive(self: &Arc<Self>, root: &Path) -> Result<()> {
        for entry in walk(root) {
            let entry = entry?;
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                self.add_dir(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Walk every entry under `root`, hidden and ignored files included.
fn walk(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build()
}

/// Watches a set of directories and dispatches files once they are ready.
pub struct WatchManager {
    shared: Arc<Shared>,
    queue_rx: Receiver<RawEvent>,
    stop_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    handler: Arc<dyn ReadyHandler>,
    notifier: Option<Arc<dyn Notifier>>,
    stability_interval: Duration,
    stability_checks: u32,
}

impl WatchManager {
    /// Create a manager with an empty registry and no workers.
    pub fn new(
        config: &Config,
        handler: Arc<dyn ReadyHandler>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        config.validate()?;

        let (queue_tx, queue_rx) = crossbeam_channel::bounded(config.queue_capacity);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let shared = Arc::new(Shared {
            registry: Mutex::new(Some(Registry {
                dirs: HashMap::new(),
                queue_tx,
            })),
            debouncer: Debouncer::new(config.debounce_window()),
            ledger: ReadyLedger::new(),
            stop_rx,
            counters: Counters::default(),
        });

        Ok(Self {
            shared,
            queue_rx,
            stop_tx: Some(stop_tx),
            workers: Vec::new(),
            handler,
            notifier,
            stability_interval: config.stability_interval(),
            stability_checks: config.stability_checks,
        })
    }

    /// Create a manager, register every configured root, and start the
    /// worker pool.
    ///
    /// If any root fails to register, the partially started manager is shut
    /// down before the error is returned.
    pub fn start(
        config: &Config,
        handler: Arc<dyn ReadyHandler>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        let mut manager = Self::new(config, handler, notifier)?;

        for root in &config.roots {
            if config.recursive {
                manager.add_dir_recursive(root)?;
            } else {
                manager.add_dir(root)?;
            }
        }

        manager.start_worker_pool(config.workers)?;
        Ok(manager)
    }

    /// Register a single directory. Registering the same directory twice,
    /// under any spelling of its path, is a no-op.
    pub fn add_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.shared.add_dir(dir.as_ref())
    }

    /// Register `root` and every directory below it.
    ///
    /// Stops at the first error; directories registered before it stay
    /// registered.
    pub fn add_dir_recursive(&self, root: impl AsRef<Path>) -> Result<()> {
        self.shared.add_dir_recursive(root.as_ref())
    }

    /// Spawn `count` workers draining the shared queue.
    pub fn start_worker_pool(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let id = self.workers.len();
            let worker = Worker {
                id,
                queue_rx: self.queue_rx.clone(),
                shared: Arc::clone(&self.shared),
                handler: Arc::clone(&self.handler),
                notifier: self.notifier.clone(),
                stability_interval: self.stability_interval,
                stability_checks: self.stability_checks,
            };
            let handle = thread::Builder::new()
                .name(format!("dropwatch-worker-{}", id))
                .spawn(move || worker.run())?;
            self.workers.push(handle);
        }
        debug!("Worker pool running with {} workers", self.workers.len());
        Ok(())
    }

    /// Paths of every registered directory, sorted.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .shared
            .registry()
            .as_ref()
            .map(|registry| registry.dirs.keys().cloned().collect())
            .unwrap_or_default();
        dirs.sort();
        dirs
    }

    pub fn watch_count(&self) -> usize {
        self.shared
            .registry()
            .as_ref()
            .map_or(0, |registry| registry.dirs.len())
    }

    pub fn is_watching(&self, dir: impl AsRef<Path>) -> bool {
        let Ok(dir) = dir.as_ref().canonicalize() else {
            return false;
        };
        self.shared
            .registry()
            .as_ref()
            .is_some_and(|registry| registry.dirs.contains_key(&dir))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> WatchStats {
        self.shared.counters.snapshot()
    }

    /// Stop every router and worker and wait for them to exit.
    ///
    /// Consumes the manager; the stop signal is one-shot.
    pub fn stop(mut self) -> WatchStats {
        self.shutdown();
        self.stats()
    }

    fn shutdown(&mut self) {
        // Dropping the only sender disconnects every stop receiver.
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        drop(stop_tx);

        // Swap the registry out so the slow part runs without the lock.
        let registry = self.shared.registry().take();

        if let Some(Registry { dirs, queue_tx }) = registry {
            // Closing the queue only takes effect once the routers have
            // dropped their senders too.
            drop(queue_tx);

            let mut routers = Vec::with_capacity(dirs.len());
            for (dir, watched) in dirs {
                drop(watched.watcher);
                routers.push((dir, watched.router));
            }
            for (dir, router) in routers {
                join_best_effort(router, &dir.display().to_string());
            }
        }

        for (id, worker) in self.workers.drain(..).enumerate() {
            join_best_effort(worker, &format!("worker {}", id));
        }

        info!("Watch manager stopped");
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchManager")
            .field("watched_dirs", &self.watch_count())
            .field("workers", &self.workers.len())
            .field("stopped", &self.stop_tx.is_none())
            .finish()
    }
}

fn join_best_effort(handle: JoinHandle<()>, what: &str) {
    if let Err(panic) = handle.join() {
        let message = panic
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("<non-string panic>");
        warn!("Thread for {} panicked: {}", what, message);
    }
}

/// Drains one directory's OS watch.
struct EventRouter {
    dir: PathBuf,
    events: Receiver<notify::Result<notify::Event>>,
    queue_tx: Sender<RawEvent>,
    stop_rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl EventRouter {
    fn run(self) {
        loop {
            select! {
                recv(self.events) -> msg => match msg {
                    Ok(Ok(event)) => {
                        for raw in RawEvent::from_notify(event) {
                            Counters::bump(&self.shared.counters.events_received);
                            if !self.route(raw) {
                                return self.exit("stop requested");
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Watch error in {}: {}", self.dir.display(), e);
                    }
                    Err(_) => return self.exit("event source closed"),
                },
                recv(self.stop_rx) -> _ => return self.exit("stop requested"),
            }
        }
    }

    fn exit(&self, reason: &str) {
        debug!("Router for {} exiting: {}", self.dir.display(), reason);
    }

    /// Debounce and enqueue one event. Returns false when the router
    /// should stop.
    fn route(&self, event: RawEvent) -> bool {
        // Whatever was dispatched from this path is gone.
        if matches!(event.op, FileOp::Remove | FileOp::Rename) {
            self.shared.ledger.forget(event.path());
        }

        if !self.shared.debouncer.accept(event.path()) {
            Counters::bump(&self.shared.counters.events_debounced);
            return true;
        }

        let new_dir = (event.op == FileOp::Create && event.path.is_dir())
            .then(|| event.path.clone());

        if !self.enqueue(event) {
            return false;
        }

        match new_dir {
            Some(dir) => self.adopt_subtree(&dir),
            None => true,
        }
    }

    /// Push onto the shared queue, giving up if the manager is stopping.
    fn enqueue(&self, event: RawEvent) -> bool {
        select! {
            send(self.queue_tx, event) -> res => {
                if res.is_ok() {
                    Counters::bump(&self.shared.counters.events_queued);
                }
                res.is_ok()
            },
            recv(self.stop_rx) -> _ => false,
        }
    }

    /// Register a directory that appeared under a watched one.
    ///
    /// The subtree may arrive fully formed (a directory copied or moved in),
    /// so files already inside it are queued as if they had just been
    /// created.
    fn adopt_subtree(&self, root: &Path) -> bool {
        for entry in walk(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to walk new directory {}: {}", root.display(), e);
                    return true;
                }
            };

            let Some(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                match self.shared.add_dir(entry.path()) {
                    Ok(()) => {}
                    Err(WatchError::Stopped) => return false,
                    Err(e) => {
                        warn!(
                            "Failed to watch new directory {}: {}",
                            entry.path().display(),
                            e
                        );
                        return true;
                    }
                }
            } else if file_type.is_file() {
                let event = RawEvent::new(entry.path(), FileOp::Create);
                if self.shared.debouncer.accept(event.path()) && !self.enqueue(event) {
                    return false;
                }
            }
        }
        true
    }
}

/// One member of the worker pool.
struct Worker {
    id: usize,
    queue_rx: Receiver<RawEvent>,
    shared: Arc<Shared>,
    handler: Arc<dyn ReadyHandler>,
    notifier: Option<Arc<dyn Notifier>>,
    stability_interval: Duration,
    stability_checks: u32,
}

impl Worker {
    fn run(self) {
        // Ends once every sender is gone and the queue is drained.
        for event in self.queue_rx.iter() {
            self.process(&event);
        }
        debug!("Worker {} exiting", self.id);
    }

    fn process(&self, event: &RawEvent) {
        let path = event.path();

        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    self.shared.ledger.forget(path);
                }
                debug!("Worker {}: dropping {}: {}", self.id, event, e);
                return;
            }
        };

        if !meta.is_file() || !event.op.is_content_change() {
            return;
        }

        match check_stability(
            path,
            self.stability_interval,
            self.stability_checks,
            &self.shared.stop_rx,
        ) {
            Stability::Stable { .. } => {}
            Stability::Cancelled => {
                debug!(
                    "Worker {}: shutdown interrupted check of {}",
                    self.id,
                    path.display()
                );
                return;
            }
            Stability::Changing | Stability::Missing => {
                debug!("Worker {}: file not stable yet: {}", self.id, path.display());
                return;
            }
        }

        let fingerprint = match Fingerprint::of(path) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                debug!("Worker {}: dropping {}: {}", self.id, event, e);
                return;
            }
        };

        if !self.shared.ledger.claim(path, fingerprint) {
            debug!("Worker {}: already dispatched {}", self.id, path.display());
            return;
        }

        info!("Worker {}: file ready: {}", self.id, path.display());

        if let Err(e) = self.handler.on_ready(path) {
            Counters::bump(&self.shared.counters.handler_failures);
            self.shared.ledger.release(path, fingerprint);
            warn!("Failed to handle {}: {:#}", path.display(), e);
            return;
        }

        Counters::bump(&self.shared.counters.files_ready);

        // The handler usually moves the file out of the drop folder. A file
        // dropped at the same path later is a new arrival.
        if !path.exists() {
            self.shared.ledger.forget(path);
        }

        match &self.notifier {
            Some(notifier) => notifier.send(&completion_message(path)),
            None => warn!(
                "No notifier configured, skipping completion message for {}",
                path.display()
            ),
        }
    }
}
