//! Test doubles for the session collaborators
//!
//! Every double can share a [`Journal`] so tests can assert on the order in
//! which side effects happened across collaborators.
//!
//! # Example
//!
//! ```
//! use sideload::test_utils::{Journal, ScriptedProbe};
//! use sideload::sentinel::SentinelProbe;
//! use std::path::Path;
//!
//! let journal = Journal::new();
//! let probe = ScriptedProbe::new(journal.clone()).appears_at("/sideload/package.zip", 1);
//! assert!(probe.check(Path::new("/sideload/package.zip")).is_err());
//! assert!(probe.check(Path::new("/sideload/package.zip")).is_ok());
//! assert_eq!(journal.count("probe /sideload/package.zip"), 2);
//! ```

use crate::poller::Sleeper;
use crate::props::PropertyStore;
use crate::sentinel::SentinelProbe;
use crate::service::ServiceControl;
use crate::supervisor::{ChildProcess, ExitKind, Spawner};
use common::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SIGKILL
const SIGKILL: i32 = 9;

/// Ordered log of side effects
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of events equal to `event`
    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }

    /// Index of the last event equal to `event`
    pub fn last_position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().rposition(|e| e == event)
    }
}

/// In-memory property store
#[derive(Debug, Default)]
pub struct MemoryProperties {
    values: Mutex<HashMap<String, String>>,
    fail_sets: bool,
}

impl MemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail
    pub fn read_only() -> Self {
        Self {
            fail_sets: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

impl PropertyStore for MemoryProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_sets {
            return Err(Error::Property(format!("{} is read-only", key)));
        }
        self.insert(key, value);
        Ok(())
    }
}

/// Service control that tracks running state and journals directives
#[derive(Debug, Default)]
pub struct RecordingServices {
    running: Mutex<HashMap<String, bool>>,
    journal: Journal,
}

impl RecordingServices {
    pub fn new(journal: Journal) -> Self {
        Self {
            running: Mutex::default(),
            journal,
        }
    }

    /// Mark a service as running before the session starts
    pub fn running(self, service: &str) -> Self {
        self.running
            .lock()
            .unwrap()
            .insert(service.to_string(), true);
        self
    }

    pub fn is_running(&self, service: &str) -> bool {
        self.running
            .lock()
            .unwrap()
            .get(service)
            .copied()
            .unwrap_or(false)
    }
}

impl ServiceControl for RecordingServices {
    fn start(&self, service: &str) -> Result<()> {
        self.journal.record(format!("start {}", service));
        self.running
            .lock()
            .unwrap()
            .insert(service.to_string(), true);
        Ok(())
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.journal.record(format!("stop {}", service));
        self.running
            .lock()
            .unwrap()
            .insert(service.to_string(), false);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ProbeScript {
    /// NotFound for the first `n` checks, then present
    AppearsAt(u32),
    /// NotFound until check `n`, which fails with `kind`
    FailsAt(u32, io::ErrorKind),
}

/// Sentinel probe driven by per-path scripts
///
/// Unscripted paths never exist.
#[derive(Debug)]
pub struct ScriptedProbe {
    scripts: HashMap<PathBuf, ProbeScript>,
    checks: Mutex<HashMap<PathBuf, u32>>,
    journal: Journal,
}

impl ScriptedProbe {
    pub fn new(journal: Journal) -> Self {
        Self {
            scripts: HashMap::new(),
            checks: Mutex::default(),
            journal,
        }
    }

    pub fn appears_at(mut self, path: impl Into<PathBuf>, check: u32) -> Self {
        self.scripts.insert(path.into(), ProbeScript::AppearsAt(check));
        self
    }

    pub fn fails_at(mut self, path: impl Into<PathBuf>, check: u32, kind: io::ErrorKind) -> Self {
        self.scripts
            .insert(path.into(), ProbeScript::FailsAt(check, kind));
        self
    }

    /// Number of checks made against `path`
    pub fn checks(&self, path: impl AsRef<Path>) -> u32 {
        self.checks
            .lock()
            .unwrap()
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }
}

impl SentinelProbe for ScriptedProbe {
    fn check(&self, path: &Path) -> io::Result<()> {
        self.journal.record(format!("probe {}", path.display()));

        let index = {
            let mut checks = self.checks.lock().unwrap();
            let count = checks.entry(path.to_path_buf()).or_insert(0);
            let index = *count;
            *count += 1;
            index
        };

        match self.scripts.get(path) {
            Some(ProbeScript::AppearsAt(at)) if index >= *at => Ok(()),
            Some(ProbeScript::FailsAt(at, kind)) if index == *at => Err(io::Error::from(*kind)),
            _ => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

/// Child process driven by a script
///
/// A child that was never scripted to exit and never killed reports a clean
/// exit from a blocking wait, the way the helper unwinds after the exit
/// sentinel is touched.
#[derive(Debug)]
pub struct ScriptedChild {
    pid: u32,
    exit: Option<(u32, ExitKind)>,
    reaps_as: Option<ExitKind>,
    polls: u32,
    killed: bool,
    journal: Journal,
}

impl ScriptedChild {
    pub fn new(pid: u32, journal: Journal) -> Self {
        Self {
            pid,
            exit: None,
            reaps_as: None,
            polls: 0,
            killed: false,
            journal,
        }
    }

    /// Report `status` from the `poll`-th non-blocking wait (zero-based)
    pub fn exits_at(mut self, poll: u32, status: ExitKind) -> Self {
        self.exit = Some((poll, status));
        self
    }

    /// Status returned by a blocking wait, overriding the default
    pub fn reaps_as(mut self, status: ExitKind) -> Self {
        self.reaps_as = Some(status);
        self
    }
}

impl ChildProcess for ScriptedChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<ExitKind>> {
        self.journal.record("try_wait");
        let poll = self.polls;
        self.polls += 1;
        match self.exit {
            Some((at, status)) if poll >= at => Ok(Some(status)),
            _ => Ok(None),
        }
    }

    fn wait(&mut self) -> Result<ExitKind> {
        self.journal.record("wait");
        if let Some(status) = self.reaps_as {
            return Ok(status);
        }
        if self.killed {
            return Ok(ExitKind::Signaled(SIGKILL));
        }
        Ok(self.exit.map(|(_, status)| status).unwrap_or(ExitKind::Exited(0)))
    }

    fn kill(&mut self) -> Result<()> {
        self.journal.record("kill");
        self.killed = true;
        Ok(())
    }
}

type SpawnHook = Box<dyn Fn() + Send + Sync>;

/// Spawner handing out one prepared [`ScriptedChild`]
pub struct FakeSpawner {
    child: Mutex<Option<ScriptedChild>>,
    journal: Journal,
    on_spawn: Option<SpawnHook>,
}

impl FakeSpawner {
    pub fn new(child: ScriptedChild, journal: Journal) -> Self {
        Self {
            child: Mutex::new(Some(child)),
            journal,
            on_spawn: None,
        }
    }

    /// A spawner whose spawn always fails
    pub fn failing(journal: Journal) -> Self {
        Self {
            child: Mutex::new(None),
            journal,
            on_spawn: None,
        }
    }

    /// Run `hook` at the moment of spawning, before the child is returned
    pub fn on_spawn(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_spawn = Some(Box::new(hook));
        self
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, install_file: &Path) -> Result<Box<dyn ChildProcess>> {
        self.journal
            .record(format!("spawn {}", install_file.display()));
        if let Some(hook) = &self.on_spawn {
            hook();
        }
        match self.child.lock().unwrap().take() {
            Some(child) => Ok(Box::new(child)),
            None => Err(Error::Process("fork failed".to_string())),
        }
    }
}

/// Sleeper that only counts
#[derive(Debug, Default)]
pub struct CountingSleeper {
    pub count: u32,
    pub total: Duration,
}

impl Sleeper for CountingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
    }
}
