//! Filesystem sentinels shared with the sideload helper
//!
//! The helper's FUSE mount exposes two magic names. The arrival path starts
//! to exist once the host connects and begins serving a package. Looking up
//! the exit path, whatever the result, tells the helper to unmount and exit.
//! inotify does not work on FUSE, so arrival is detected by polling.

use std::io;
use std::path::{Path, PathBuf};

/// Appears when the host starts streaming a package
pub const DEFAULT_ARRIVAL_PATH: &str = "/sideload/package.zip";

/// Stat'ing this path asks the helper to shut down
pub const DEFAULT_EXIT_PATH: &str = "/sideload/exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelPaths {
    pub arrival: PathBuf,
    pub exit: PathBuf,
}

impl Default for SentinelPaths {
    fn default() -> Self {
        Self {
            arrival: PathBuf::from(DEFAULT_ARRIVAL_PATH),
            exit: PathBuf::from(DEFAULT_EXIT_PATH),
        }
    }
}

impl SentinelPaths {
    pub fn new(arrival: impl Into<PathBuf>, exit: impl Into<PathBuf>) -> Self {
        Self {
            arrival: arrival.into(),
            exit: exit.into(),
        }
    }

    /// Signal the helper to shut down. The lookup result is irrelevant.
    pub fn touch_exit(&self, probe: &dyn SentinelProbe) {
        let _ = probe.check(&self.exit);
    }
}

/// Existence check against the virtual mount
pub trait SentinelProbe: Send + Sync {
    fn check(&self, path: &Path) -> io::Result<()>;
}

/// `stat(2)` through `std::fs::metadata`
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl SentinelProbe for FsProbe {
    fn check(&self, path: &Path) -> io::Result<()> {
        std::fs::metadata(path).map(|_| ())
    }
}
