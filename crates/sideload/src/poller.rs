//! Arrival poller
//!
//! Waits for the host to start serving a package by polling the arrival
//! sentinel once per tick. Within a tick the child is checked first: a dead
//! helper can never produce the mount, so its exit wins over arrival.

use crate::sentinel::SentinelProbe;
use crate::supervisor::{ExitKind, SessionHandle};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Ticks to wait for the host before giving up
pub const DEFAULT_TIMEOUT_TICKS: u32 = 300;

/// Length of one tick
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Blocking delay between polls
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The arrival sentinel exists; `tick` is the zero-based iteration
    Arrived { tick: u32 },
    /// The helper exited (and was reaped) before arrival
    ChildExited(ExitKind),
    /// The wait ran out or the sentinel became unreadable; the helper was killed
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ArrivalPoller {
    arrival: PathBuf,
    timeout_ticks: u32,
    interval: Duration,
}

impl ArrivalPoller {
    pub fn new(arrival: impl Into<PathBuf>, timeout_ticks: u32, interval: Duration) -> Self {
        Self {
            arrival: arrival.into(),
            timeout_ticks,
            interval,
        }
    }

    /// Poll until arrival, child exit, or `timeout_ticks` failed checks
    ///
    /// Sleeps at most `timeout_ticks - 1` times: the last failed check ends
    /// the wait instead of sleeping again.
    pub fn await_arrival(
        &self,
        child: &mut SessionHandle,
        probe: &dyn SentinelProbe,
        sleeper: &mut dyn Sleeper,
    ) -> PollOutcome {
        for tick in 0..self.timeout_ticks {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Sideload helper exited at tick {} ({})", tick, status);
                    return PollOutcome::ChildExited(status);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to check sideload helper {}: {}", child.pid(), e);
                    return PollOutcome::ChildExited(ExitKind::Unknown);
                }
            }

            match probe.check(&self.arrival) {
                Ok(()) => {
                    debug!("Package arrived at tick {}", tick);
                    return PollOutcome::Arrived { tick };
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound && tick + 1 < self.timeout_ticks => {
                    sleeper.sleep(self.interval);
                }
                Err(e) => {
                    warn!("Timed out waiting for package: {}", e);
                    return self.give_up(child);
                }
            }
        }

        warn!("Timed out waiting for package: no poll ticks configured");
        self.give_up(child)
    }

    fn give_up(&self, child: &mut SessionHandle) -> PollOutcome {
        if let Err(e) = child.kill() {
            warn!("Failed to kill sideload helper {}: {}", child.pid(), e);
        }
        PollOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ChildSlot;
    use crate::test_utils::{CountingSleeper, Journal, ScriptedChild, ScriptedProbe};
    use proptest::prelude::*;

    const ARRIVAL: &str = "/sideload/package.zip";

    fn poller(ticks: u32) -> ArrivalPoller {
        ArrivalPoller::new(ARRIVAL, ticks, DEFAULT_POLL_INTERVAL)
    }

    fn handle(child: ScriptedChild) -> SessionHandle {
        SessionHandle::new(Box::new(child), ChildSlot::new())
    }

    #[test]
    fn test_arrival_at_tick_five() {
        let journal = Journal::new();
        let mut child = handle(ScriptedChild::new(10, journal.clone()));
        let probe = ScriptedProbe::new(journal.clone()).appears_at(ARRIVAL, 5);
        let mut sleeper = CountingSleeper::default();

        let outcome = poller(300).await_arrival(&mut child, &probe, &mut sleeper);
        assert_eq!(outcome, PollOutcome::Arrived { tick: 5 });
        assert_eq!(sleeper.count, 5);
        assert_eq!(sleeper.total, Duration::from_secs(5));
        assert_eq!(journal.count("kill"), 0);
        assert!(child.is_alive());
    }

    #[test]
    fn test_timeout_kills_once() {
        let journal = Journal::new();
        let mut child = handle(ScriptedChild::new(10, journal.clone()));
        let probe = ScriptedProbe::new(journal.clone());
        let mut sleeper = CountingSleeper::default();

        let outcome = poller(300).await_arrival(&mut child, &probe, &mut sleeper);
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(probe.checks(ARRIVAL), 300);
        assert_eq!(sleeper.count, 299);
        assert_eq!(journal.count("kill"), 1);
    }

    #[test]
    fn test_child_exit_beats_arrival() {
        let journal = Journal::new();
        let mut child = handle(ScriptedChild::new(10, journal.clone()).exits_at(3, ExitKind::Exited(3)));
        let probe = ScriptedProbe::new(journal.clone()).appears_at(ARRIVAL, 3);
        let mut sleeper = CountingSleeper::default();

        let outcome = poller(300).await_arrival(&mut child, &probe, &mut sleeper);
        assert_eq!(outcome, PollOutcome::ChildExited(ExitKind::Exited(3)));
        assert_eq!(probe.checks(ARRIVAL), 3);
        assert_eq!(journal.count("kill"), 0);
    }

    #[test]
    fn test_probe_error_ends_wait_early() {
        let journal = Journal::new();
        let mut child = handle(ScriptedChild::new(10, journal.clone()));
        let probe = ScriptedProbe::new(journal.clone())
            .fails_at(ARRIVAL, 2, io::ErrorKind::PermissionDenied);
        let mut sleeper = CountingSleeper::default();

        let outcome = poller(300).await_arrival(&mut child, &probe, &mut sleeper);
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(sleeper.count, 2);
        assert_eq!(journal.count("kill"), 1);
    }

    #[test]
    fn test_zero_ticks_times_out() {
        let journal = Journal::new();
        let mut child = handle(ScriptedChild::new(10, journal.clone()));
        let probe = ScriptedProbe::new(journal.clone());
        let mut sleeper = CountingSleeper::default();

        let outcome = poller(0).await_arrival(&mut child, &probe, &mut sleeper);
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(probe.checks(ARRIVAL), 0);
        assert_eq!(journal.count("kill"), 1);
    }

    #[test]
    fn test_single_tick_never_sleeps() {
        let journal = Journal::new();
        let mut child = handle(ScriptedChild::new(10, journal.clone()));
        let probe = ScriptedProbe::new(journal.clone());
        let mut sleeper = CountingSleeper::default();

        let outcome = poller(1).await_arrival(&mut child, &probe, &mut sleeper);
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(sleeper.count, 0);
    }

    proptest! {
        #[test]
        fn prop_wait_bound_is_exact(ticks in 1u32..64, arrival in proptest::option::of(0u32..80)) {
            let journal = Journal::new();
            let mut child = handle(ScriptedChild::new(10, journal.clone()));
            let mut probe = ScriptedProbe::new(journal.clone());
            if let Some(at) = arrival {
                probe = probe.appears_at(ARRIVAL, at);
            }
            let mut sleeper = CountingSleeper::default();

            let outcome = poller(ticks).await_arrival(&mut child, &probe, &mut sleeper);

            match arrival {
                Some(at) if at < ticks => {
                    prop_assert_eq!(outcome, PollOutcome::Arrived { tick: at });
                    prop_assert_eq!(sleeper.count, at);
                    prop_assert_eq!(journal.count("kill"), 0);
                }
                _ => {
                    prop_assert_eq!(outcome, PollOutcome::TimedOut);
                    prop_assert_eq!(probe.checks(ARRIVAL), ticks);
                    prop_assert_eq!(sleeper.count, ticks - 1);
                    prop_assert_eq!(journal.count("kill"), 1);
                }
            }
        }
    }
}
