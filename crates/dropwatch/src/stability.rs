//! File size stability checks.
//!
//! There is no portable "writer closed the file" signal, so readiness is
//! inferred by sampling the file size a few times and requiring that it
//! does not change between samples.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{select, Receiver};

/// Default delay between size samples
pub const DEFAULT_STABILITY_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of size samples
pub const DEFAULT_STABILITY_CHECKS: u32 = 2;

/// Outcome of a stability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Every sample saw the same size
    Stable { len: u64 },
    /// The size changed between two samples
    Changing,
    /// The path vanished or stopped being a regular file
    Missing,
    /// The cancel signal fired before sampling finished
    Cancelled,
}

impl Stability {
    pub fn is_stable(self) -> bool {
        matches!(self, Stability::Stable { .. })
    }
}

/// Sample the size of `path` `checks` times, `interval` apart, and report
/// whether it stayed the same.
pub fn is_file_stable(path: &Path, interval: Duration, checks: u32) -> bool {
    file_stability(path, interval, checks).is_stable()
}

/// Uninterruptible stability check reporting the full outcome.
pub fn file_stability(path: &Path, interval: Duration, checks: u32) -> Stability {
    check_stability(path, interval, checks, &crossbeam_channel::never())
}

/// Like [`is_file_stable`], but the sleeps between samples end early when
/// `cancel` receives a message or is disconnected.
pub fn check_stability(
    path: &Path,
    interval: Duration,
    checks: u32,
    cancel: &Receiver<()>,
) -> Stability {
    let checks = checks.max(1);
    let mut last_len: Option<u64> = None;

    for sample in 0..checks {
        if sample > 0 {
            select! {
                recv(cancel) -> _ => return Stability::Cancelled,
                default(interval) => {}
            }
        }

        let len = match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Stability::Missing,
        };

        if let Some(previous) = last_len {
            if previous != len {
                tracing::debug!(
                    "Size of {} changed {} -> {} on sample {}",
                    path.display(),
                    previous,
                    len,
                    sample + 1
                );
                return Stability::Changing;
            }
        }
        last_len = Some(len);
    }

    match last_len {
        Some(len) => Stability::Stable { len },
        None => Stability::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_quiescent_file_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.flac");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let start = Instant::now();
        let result = check_stability(
            &path,
            Duration::from_millis(50),
            3,
            &crossbeam_channel::never(),
        );

        assert_eq!(result, Stability::Stable { len: 4096 });
        // Three samples means two sleeps.
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(is_file_stable(&path, Duration::from_millis(10), 2));
    }

    #[test]
    fn test_growing_file_is_unstable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.flac");
        std::fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            let mut file = OpenOptions::new().append(true).open(writer_path).unwrap();
            for _ in 0..30 {
                file.write_all(&[1u8; 128]).unwrap();
                file.flush().unwrap();
                std::thread::sleep(Duration::from_millis(10));
            }
        });

        let result = check_stability(
            &path,
            Duration::from_millis(60),
            2,
            &crossbeam_channel::never(),
        );
        writer.join().unwrap();

        assert_eq!(result, Stability::Changing);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.flac");
        assert!(!is_file_stable(&path, Duration::from_millis(10), 2));
    }

    #[test]
    fn test_directory_is_not_stable() {
        let dir = TempDir::new().unwrap();
        let result = check_stability(
            dir.path(),
            Duration::from_millis(10),
            2,
            &crossbeam_channel::never(),
        );
        assert_eq!(result, Stability::Missing);
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.flac");
        std::fs::write(&path, b"abc").unwrap();

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        drop(cancel_tx);

        let start = Instant::now();
        let result = check_stability(&path, Duration::from_secs(30), 2, &cancel_rx);

        assert_eq!(result, Stability::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_single_check_only_needs_a_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("song.flac");
        std::fs::write(&path, b"abc").unwrap();

        let result = check_stability(&path, Duration::from_secs(30), 1, &crossbeam_channel::never());
        assert_eq!(result, Stability::Stable { len: 3 });
    }
}
