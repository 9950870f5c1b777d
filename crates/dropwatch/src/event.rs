//! Filesystem events as seen by the routers and workers.
//!
//! notify reports a rich, platform-flavoured `EventKind`. The pipeline only
//! cares about five operations, so raw notify events are folded into
//! [`RawEvent`]s carrying a single path and a [`FileOp`].

use std::fmt;
use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// The operation a filesystem event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileOp {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl FileOp {
    /// Whether this operation can leave a file with new content that
    /// should be checked for readiness.
    pub fn is_content_change(self) -> bool {
        matches!(self, FileOp::Create | FileOp::Write)
    }
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOp::Create => write!(f, "CREATE"),
            FileOp::Write => write!(f, "WRITE"),
            FileOp::Remove => write!(f, "REMOVE"),
            FileOp::Rename => write!(f, "RENAME"),
            FileOp::Chmod => write!(f, "CHMOD"),
        }
    }
}

/// A single-path filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub op: FileOp,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, op: FileOp) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split a notify event into one `RawEvent` per path.
    ///
    /// Returns an empty vec for events that carry no useful operation
    /// (plain opens and reads, `Other`).
    pub fn from_notify(event: Event) -> Vec<RawEvent> {
        // A two-path rename reports the source and the destination.
        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
            let mut paths = event.paths.into_iter();
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                out.push(RawEvent::new(from, FileOp::Rename));
            }
            if let Some(to) = paths.next() {
                out.push(RawEvent::new(to, FileOp::Create));
            }
            return out;
        }

        let Some(op) = op_for_kind(&event.kind) else {
            return Vec::new();
        };

        event
            .paths
            .into_iter()
            .map(|path| RawEvent::new(path, op))
            .collect()
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.path.display())
    }
}

fn op_for_kind(kind: &EventKind) -> Option<FileOp> {
    match kind {
        EventKind::Create(_) => Some(FileOp::Create),
        EventKind::Remove(_) => Some(FileOp::Remove),

        EventKind::Modify(ModifyKind::Metadata(_)) => Some(FileOp::Chmod),
        // Moved into the watched directory: looks like a new file.
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileOp::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileOp::Rename),
        EventKind::Modify(_) => Some(FileOp::Write),

        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FileOp::Write),
        EventKind::Access(_) => None,

        EventKind::Any => Some(FileOp::Write),
        EventKind::Other => None,
    }
}
