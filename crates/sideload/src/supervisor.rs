//! Sideload helper process supervision
//!
//! The helper (`recovery --adbd <file>`) serves the virtual mount the host
//! streams into. The session owns exactly one helper through a
//! [`SessionHandle`], which is responsible for reaping it on every path.

use common::{Error, Result};
use std::fmt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Default sideload helper binary
pub const DEFAULT_HELPER: &str = "/sbin/recovery";

/// `argv[0]` handed to the helper
pub const DEFAULT_HELPER_ARG0: &str = "recovery";

/// Flag selecting the helper's sideload-serving mode
pub const DEFAULT_MODE_FLAG: &str = "--adbd";

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal exit with a status code
    Exited(i32),
    /// Terminated by a signal
    Signaled(i32),
    /// The status could not be collected
    Unknown,
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitKind::Exited(code)
        } else if let Some(signal) = status.signal() {
            ExitKind::Signaled(signal)
        } else {
            ExitKind::Unknown
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Exited(code) => write!(f, "status {}", code),
            ExitKind::Signaled(signal) => match nix::sys::signal::Signal::try_from(*signal) {
                Ok(sig) => write!(f, "signal {}", sig),
                Err(_) => write!(f, "signal {}", signal),
            },
            ExitKind::Unknown => write!(f, "unknown status"),
        }
    }
}

/// A spawned child process
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    /// Reap without blocking; `None` while the child is still running
    fn try_wait(&mut self) -> Result<Option<ExitKind>>;

    /// Block until the child exits and reap it
    fn wait(&mut self) -> Result<ExitKind>;

    /// Forcibly terminate the child (SIGKILL)
    fn kill(&mut self) -> Result<()>;
}

/// Starts the sideload helper
pub trait Spawner: Send + Sync {
    fn spawn(&self, install_file: &Path) -> Result<Box<dyn ChildProcess>>;
}

/// Spawns `<helper> <mode_flag> <install_file>`
#[derive(Debug, Clone)]
pub struct HelperSpawner {
    helper: PathBuf,
    arg0: String,
    mode_flag: String,
}

impl Default for HelperSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_HELPER, DEFAULT_HELPER_ARG0, DEFAULT_MODE_FLAG)
    }
}

impl HelperSpawner {
    pub fn new(
        helper: impl Into<PathBuf>,
        arg0: impl Into<String>,
        mode_flag: impl Into<String>,
    ) -> Self {
        Self {
            helper: helper.into(),
            arg0: arg0.into(),
            mode_flag: mode_flag.into(),
        }
    }
}

impl Spawner for HelperSpawner {
    fn spawn(&self, install_file: &Path) -> Result<Box<dyn ChildProcess>> {
        // Exec failure surfaces here as an error; the child never falls back
        // into our code.
        let child = Command::new(&self.helper)
            .arg0(&self.arg0)
            .arg(&self.mode_flag)
            .arg(install_file)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::Process(format!(
                    "Failed to spawn {}: {}",
                    self.helper.display(),
                    e
                ))
            })?;

        debug!(
            "Spawned {} {} {} as pid {}",
            self.helper.display(),
            self.mode_flag,
            install_file.display(),
            child.id()
        );
        Ok(Box::new(HelperChild(child)))
    }
}

struct HelperChild(Child);

impl ChildProcess for HelperChild {
    fn id(&self) -> u32 {
        self.0.id()
    }

    fn try_wait(&mut self) -> Result<Option<ExitKind>> {
        Ok(self.0.try_wait()?.map(ExitKind::from))
    }

    fn wait(&mut self) -> Result<ExitKind> {
        Ok(self.0.wait()?.into())
    }

    fn kill(&mut self) -> Result<()> {
        Ok(self.0.kill()?)
    }
}

/// Shared view of the live child pid
///
/// Lets another thread kill the helper while the session blocks in the poll
/// loop. Reads `None` when no child is owned.
#[derive(Debug, Clone, Default)]
pub struct ChildSlot(Arc<AtomicU32>);

impl ChildSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn set(&self, pid: u32) {
        self.0.store(pid, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Sole owner of the session's child process
pub struct SessionHandle {
    child: Box<dyn ChildProcess>,
    pid: u32,
    status: Option<ExitKind>,
    killed: bool,
    slot: ChildSlot,
}

impl SessionHandle {
    /// Take ownership of `child` and publish its pid in `slot`
    pub fn new(child: Box<dyn ChildProcess>, slot: ChildSlot) -> Self {
        let pid = child.id();
        slot.set(pid);
        Self {
            child,
            pid,
            status: None,
            killed: false,
            slot,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.status.is_none()
    }

    /// Non-blocking reap
    pub fn try_wait(&mut self) -> Result<Option<ExitKind>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Blocking reap; returns the cached status if already reaped
    pub fn wait(&mut self) -> Result<ExitKind> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    /// Kill the child unless it was already reaped
    pub fn kill(&mut self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        self.killed = true;
        self.child.kill()
    }

    /// Stop advertising the pid to other threads
    pub fn release_slot(&self) {
        self.slot.clear();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.slot.clear();
        if self.status.is_some() {
            return;
        }

        warn!("Sideload helper {} dropped while running, killing", self.pid);
        if !self.killed {
            if let Err(e) = self.child.kill() {
                warn!("Failed to kill sideload helper {}: {}", self.pid, e);
            }
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap sideload helper {}: {}", self.pid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Journal, ScriptedChild};

    #[test]
    fn test_exit_kind_from_status() {
        assert_eq!(ExitKind::from(ExitStatus::from_raw(0)), ExitKind::Exited(0));
        assert_eq!(ExitKind::from(ExitStatus::from_raw(3 << 8)), ExitKind::Exited(3));
        assert_eq!(ExitKind::from(ExitStatus::from_raw(9)), ExitKind::Signaled(9));
    }

    #[test]
    fn test_exit_kind_display() {
        assert_eq!(ExitKind::Exited(3).to_string(), "status 3");
        assert_eq!(ExitKind::Signaled(9).to_string(), "signal SIGKILL");
        assert_eq!(ExitKind::Unknown.to_string(), "unknown status");
    }

    #[test]
    fn test_slot_tracks_handle() {
        let slot = ChildSlot::new();
        assert_eq!(slot.get(), None);

        let journal = Journal::new();
        let child = ScriptedChild::new(4242, journal.clone()).exits_at(0, ExitKind::Exited(1));
        let mut handle = SessionHandle::new(Box::new(child), slot.clone());
        assert_eq!(slot.get(), Some(4242));

        assert_eq!(handle.try_wait().unwrap(), Some(ExitKind::Exited(1)));
        drop(handle);
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_wait_returns_cached_status() {
        let journal = Journal::new();
        let child = ScriptedChild::new(7, journal.clone()).exits_at(0, ExitKind::Exited(3));
        let mut handle = SessionHandle::new(Box::new(child), ChildSlot::new());

        assert_eq!(handle.try_wait().unwrap(), Some(ExitKind::Exited(3)));
        assert_eq!(handle.wait().unwrap(), ExitKind::Exited(3));
        assert!(!handle.is_alive());
        assert_eq!(journal.count("kill"), 0);
    }

    #[test]
    fn test_drop_reaps_live_child() {
        let journal = Journal::new();
        let child = ScriptedChild::new(7, journal.clone());
        let handle = SessionHandle::new(Box::new(child), ChildSlot::new());
        drop(handle);

        assert_eq!(journal.count("kill"), 1);
        assert_eq!(journal.count("wait"), 1);
    }

    #[test]
    fn test_kill_after_reap_is_noop() {
        let journal = Journal::new();
        let child = ScriptedChild::new(7, journal.clone()).exits_at(0, ExitKind::Exited(0));
        let mut handle = SessionHandle::new(Box::new(child), ChildSlot::new());
        handle.try_wait().unwrap();
        handle.kill().unwrap();
        assert_eq!(journal.count("kill"), 0);
    }

    #[test]
    fn test_spawn_missing_helper_fails() {
        let spawner = HelperSpawner::new("/nonexistent/sbin/recovery", "recovery", "--adbd");
        let result = spawner.spawn(Path::new("/tmp/update.zip"));
        assert!(matches!(result, Err(Error::Process(_))));
    }

    #[test]
    fn test_spawn_real_process() {
        // `true` ignores its arguments and exits 0
        let spawner = HelperSpawner::new("true", "true", "--adbd");
        let child = spawner.spawn(Path::new("/tmp/update.zip")).unwrap();
        let mut handle = SessionHandle::new(child, ChildSlot::new());
        assert_eq!(handle.wait().unwrap(), ExitKind::Exited(0));
    }
}
