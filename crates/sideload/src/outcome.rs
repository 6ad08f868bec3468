//! Session outcome classification

use crate::supervisor::ExitKind;
use std::fmt;
use tracing::{error, warn};

/// Helper exit status meaning the host adb is too old to sideload
pub const EXIT_PROTOCOL_VERSION: i32 = 3;

/// Terminal classification of a sideload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCode {
    /// The package was handed off (or the handoff completed cleanly)
    Success,
    GenericError,
    /// Host tool too old for this device
    ProtocolVersionError,
    /// No package arrived before the timeout
    TimedOut,
}

impl OutcomeCode {
    /// Code reported to the caller: 0, -1 or -2. A timeout reports -1.
    pub fn code(self) -> i32 {
        match self {
            OutcomeCode::Success => 0,
            OutcomeCode::GenericError | OutcomeCode::TimedOut => -1,
            OutcomeCode::ProtocolVersionError => -2,
        }
    }

    pub fn is_success(self) -> bool {
        self == OutcomeCode::Success
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeCode::Success => "success",
            OutcomeCode::GenericError => "error",
            OutcomeCode::ProtocolVersionError => "protocol version error",
            OutcomeCode::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Classify a session that ended before any package arrived
///
/// Status 3 wins over a timeout: a helper that exited with it before the
/// kill landed still means the host tool is too old.
pub fn classify_abandoned(status: ExitKind, timed_out: bool) -> OutcomeCode {
    match status {
        ExitKind::Exited(EXIT_PROTOCOL_VERSION) => {
            error!("You need adb 1.0.32 or newer to sideload to this device");
            OutcomeCode::ProtocolVersionError
        }
        _ if timed_out => OutcomeCode::TimedOut,
        ExitKind::Exited(0) => {
            warn!("Sideload helper exited cleanly before a package arrived");
            OutcomeCode::GenericError
        }
        ExitKind::Exited(code) => {
            error!("Sideload helper failed with status {}", code);
            OutcomeCode::GenericError
        }
        ExitKind::Signaled(_) => {
            warn!("Sideload helper terminated by {}", status);
            OutcomeCode::GenericError
        }
        ExitKind::Unknown => {
            error!("Sideload helper exit status unavailable");
            OutcomeCode::GenericError
        }
    }
}

/// Classify a helper that was reaped after a completed handoff
pub fn classify_handoff(status: ExitKind) -> OutcomeCode {
    match status {
        ExitKind::Exited(0) => OutcomeCode::Success,
        other => classify_abandoned(other, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(OutcomeCode::Success.code(), 0);
        assert_eq!(OutcomeCode::GenericError.code(), -1);
        assert_eq!(OutcomeCode::TimedOut.code(), -1);
        assert_eq!(OutcomeCode::ProtocolVersionError.code(), -2);
    }

    #[test]
    fn test_protocol_version_regardless_of_timing() {
        assert_eq!(
            classify_abandoned(ExitKind::Exited(3), false),
            OutcomeCode::ProtocolVersionError
        );
        assert_eq!(
            classify_abandoned(ExitKind::Exited(3), true),
            OutcomeCode::ProtocolVersionError
        );
        assert_eq!(
            classify_handoff(ExitKind::Exited(3)),
            OutcomeCode::ProtocolVersionError
        );
    }

    #[test]
    fn test_clean_exit_before_arrival_is_error() {
        assert_eq!(
            classify_abandoned(ExitKind::Exited(0), false),
            OutcomeCode::GenericError
        );
    }

    #[test]
    fn test_other_statuses() {
        assert_eq!(
            classify_abandoned(ExitKind::Exited(1), false),
            OutcomeCode::GenericError
        );
        assert_eq!(
            classify_abandoned(ExitKind::Signaled(9), false),
            OutcomeCode::GenericError
        );
        assert_eq!(
            classify_abandoned(ExitKind::Signaled(9), true),
            OutcomeCode::TimedOut
        );
        assert_eq!(
            classify_abandoned(ExitKind::Unknown, false),
            OutcomeCode::GenericError
        );
    }

    #[test]
    fn test_handoff_clean_exit_succeeds() {
        assert_eq!(classify_handoff(ExitKind::Exited(0)), OutcomeCode::Success);
        assert_eq!(
            classify_handoff(ExitKind::Exited(1)),
            OutcomeCode::GenericError
        );
    }
}
