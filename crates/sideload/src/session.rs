//! Sideload session controller
//!
//! A session runs exactly once:
//!
//! 1. take the session lock
//! 2. stop the debug daemon (disabling the gadget), then enable the gadget
//! 3. spawn the sideload helper
//! 4. poll for the arrival sentinel
//! 5. on arrival, hand the live helper to the caller; otherwise signal the
//!    helper through the exit sentinel, reap it, disable the gadget,
//!    conditionally restart the daemon and classify the outcome
//!
//! Whether the daemon comes back is decided by the debuggable flag as it
//! reads when the session starts.
//!
//! There is no retry. A failed session is abandoned and a new one may be
//! started once this one has returned.

use crate::context::UsbDebugContext;
use crate::outcome::{OutcomeCode, classify_abandoned, classify_handoff};
use crate::poller::{ArrivalPoller, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT_TICKS, PollOutcome, Sleeper};
use crate::lock::SessionGuard;
use crate::sentinel::{SentinelPaths, SentinelProbe};
use crate::supervisor::{ChildSlot, ExitKind, SessionHandle, Spawner};
use common::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sentinels: SentinelPaths,
    /// Poll iterations before giving up
    pub timeout_ticks: u32,
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sentinels: SentinelPaths::default(),
            timeout_ticks: DEFAULT_TIMEOUT_TICKS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How a session ended
pub enum SessionOutcome {
    /// A package is arriving; the helper is still serving it
    Handoff(SideloadHandoff),
    /// The session was abandoned and the USB state restored
    Finished(OutcomeCode),
}

impl SessionOutcome {
    /// Caller-facing code: 0 for a handoff, otherwise the outcome's code
    pub fn code(&self) -> i32 {
        match self {
            SessionOutcome::Handoff(_) => 0,
            SessionOutcome::Finished(outcome) => outcome.code(),
        }
    }
}

pub struct SideloadSession {
    ctx: UsbDebugContext,
    spawner: Arc<dyn Spawner>,
    probe: Arc<dyn SentinelProbe>,
    config: SessionConfig,
    slot: ChildSlot,
}

impl SideloadSession {
    pub fn new(
        ctx: UsbDebugContext,
        spawner: Arc<dyn Spawner>,
        probe: Arc<dyn SentinelProbe>,
    ) -> Self {
        Self {
            ctx,
            spawner,
            probe,
            config: SessionConfig::default(),
            slot: ChildSlot::new(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Pid of the live helper, readable from other threads
    ///
    /// Killing that pid while [`run`](Self::run) is polling ends the session
    /// through the normal child-exit path.
    pub fn child_slot(&self) -> ChildSlot {
        self.slot.clone()
    }

    /// Run the session for `install_file`
    ///
    /// Fails only with [`common::Error::SessionBusy`], before any side effect.
    /// Every other failure is reported through [`OutcomeCode`].
    pub fn run(&self, install_file: &Path, sleeper: &mut dyn Sleeper) -> Result<SessionOutcome> {
        let guard = self.ctx.lock().try_acquire()?;
        let debuggable = self.ctx.is_debuggable();

        self.ctx.stop_daemon();
        self.ctx.set_driver_enabled(true);

        info!("Now send the package you want to apply to the device with \"adb sideload <filename>\"...");

        let child = match self.spawner.spawn(install_file) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start sideload helper: {}", e);
                return Ok(SessionOutcome::Finished(OutcomeCode::GenericError));
            }
        };
        let mut handle = SessionHandle::new(child, self.slot.clone());

        let poller = ArrivalPoller::new(
            &self.config.sentinels.arrival,
            self.config.timeout_ticks,
            self.config.poll_interval,
        );

        let outcome = match poller.await_arrival(&mut handle, self.probe.as_ref(), sleeper) {
            PollOutcome::Arrived { tick } => {
                info!(
                    "Package arriving at {} (helper pid {})",
                    self.config.sentinels.arrival.display(),
                    handle.pid()
                );
                return Ok(SessionOutcome::Handoff(SideloadHandoff {
                    ctx: self.ctx.clone(),
                    probe: self.probe.clone(),
                    sentinels: self.config.sentinels.clone(),
                    handle,
                    tick,
                    debuggable,
                    finished: false,
                    _guard: guard,
                }));
            }
            PollOutcome::TimedOut => self.abandon(handle, true, debuggable),
            PollOutcome::ChildExited(_) => self.abandon(handle, false, debuggable),
        };

        drop(guard);
        Ok(SessionOutcome::Finished(outcome))
    }

    fn abandon(&self, mut handle: SessionHandle, timed_out: bool, debuggable: bool) -> OutcomeCode {
        handle.release_slot();
        let status = shut_down_helper(&mut handle, &self.config.sentinels, self.probe.as_ref());
        drop(handle);

        let outcome = classify_abandoned(status, timed_out);
        self.ctx.restore(debuggable);
        info!("Sideload session ended: {}", outcome);
        outcome
    }
}

/// Touch the exit sentinel, then block until the helper is reaped
fn shut_down_helper(
    handle: &mut SessionHandle,
    sentinels: &SentinelPaths,
    probe: &dyn SentinelProbe,
) -> ExitKind {
    sentinels.touch_exit(probe);
    match handle.wait() {
        Ok(status) => status,
        Err(e) => {
            error!("Failed to reap sideload helper {}: {}", handle.pid(), e);
            ExitKind::Unknown
        }
    }
}

/// A live helper serving an arriving package
///
/// Restoring the USB state is the caller's job once installation is done:
/// call [`finish`](Self::finish). Dropping an unfinished handoff finishes
/// it with a warning.
pub struct SideloadHandoff {
    ctx: UsbDebugContext,
    probe: Arc<dyn SentinelProbe>,
    sentinels: SentinelPaths,
    handle: SessionHandle,
    tick: u32,
    /// Debuggable flag as read at session start
    debuggable: bool,
    finished: bool,
    _guard: SessionGuard,
}

impl SideloadHandoff {
    /// Where the installer reads the package from
    pub fn package_path(&self) -> &Path {
        &self.sentinels.arrival
    }

    pub fn child_pid(&self) -> u32 {
        self.handle.pid()
    }

    /// Poll iteration at which the package appeared
    pub fn arrived_at_tick(&self) -> u32 {
        self.tick
    }

    /// Shut the helper down and restore the gadget and daemon
    pub fn finish(mut self) -> OutcomeCode {
        self.complete()
    }

    fn complete(&mut self) -> OutcomeCode {
        self.finished = true;
        self.handle.release_slot();

        let status = shut_down_helper(&mut self.handle, &self.sentinels, self.probe.as_ref());
        let outcome = classify_handoff(status);

        self.ctx.restore(self.debuggable);
        info!("Sideload handoff finished: {}", outcome);
        outcome
    }
}

impl Drop for SideloadHandoff {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Sideload handoff dropped before finish, restoring USB state");
            self.complete();
        }
    }
}
