//! Debug daemon service control
//!
//! Directives are fire-and-forget: the supervisor is asked to start or stop a
//! service and nothing waits for the transition to complete.

use crate::props::PropertyStore;
use common::{Error, Result};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Name of the debug bridge daemon service
pub const DEBUG_DAEMON: &str = "adbd";

/// Property init watches for service start directives
pub const CTL_START_PROPERTY: &str = "ctl.start";

/// Property init watches for service stop directives
pub const CTL_STOP_PROPERTY: &str = "ctl.stop";

/// System-wide process supervisor
pub trait ServiceControl: Send + Sync {
    fn start(&self, service: &str) -> Result<()>;
    fn stop(&self, service: &str) -> Result<()>;
}

/// Issues directives through `ctl.start` / `ctl.stop` properties
pub struct PropertyServiceControl {
    props: Arc<dyn PropertyStore>,
}

impl PropertyServiceControl {
    pub fn new(props: Arc<dyn PropertyStore>) -> Self {
        Self { props }
    }
}

impl ServiceControl for PropertyServiceControl {
    fn start(&self, service: &str) -> Result<()> {
        debug!("{}={}", CTL_START_PROPERTY, service);
        self.props.set(CTL_START_PROPERTY, service)
    }

    fn stop(&self, service: &str) -> Result<()> {
        debug!("{}={}", CTL_STOP_PROPERTY, service);
        self.props.set(CTL_STOP_PROPERTY, service)
    }
}

/// Issues directives through `systemctl`
///
/// For hosts where the bridge daemon runs as a systemd unit.
#[derive(Debug, Clone)]
pub struct SystemdServiceControl {
    systemctl: PathBuf,
}

impl Default for SystemdServiceControl {
    fn default() -> Self {
        Self {
            systemctl: PathBuf::from("systemctl"),
        }
    }
}

impl SystemdServiceControl {
    pub fn with_binary(systemctl: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: systemctl.into(),
        }
    }

    fn run(&self, verb: &str, unit: &str) -> Result<()> {
        // --no-block: queue the job and return, matching init's ctl.* semantics
        let status = Command::new(&self.systemctl)
            .args(["--no-block", verb, unit])
            .status()
            .map_err(|e| Error::Service(format!("Failed to run systemctl {}: {}", verb, e)))?;

        if !status.success() {
            return Err(Error::Service(format!(
                "systemctl {} {} exited with {}",
                verb, unit, status
            )));
        }

        debug!("systemctl {} {}", verb, unit);
        Ok(())
    }
}

impl ServiceControl for SystemdServiceControl {
    fn start(&self, service: &str) -> Result<()> {
        self.run("start", service)
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.run("stop", service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryProperties;

    #[test]
    fn test_property_directives() {
        let props = Arc::new(MemoryProperties::new());
        let control = PropertyServiceControl::new(props.clone());

        control.stop(DEBUG_DAEMON).unwrap();
        assert_eq!(props.get(CTL_STOP_PROPERTY).as_deref(), Some("adbd"));
        assert_eq!(props.get(CTL_START_PROPERTY), None);

        control.start(DEBUG_DAEMON).unwrap();
        assert_eq!(props.get(CTL_START_PROPERTY).as_deref(), Some("adbd"));
    }

    #[test]
    fn test_systemctl_missing_binary() {
        let control = SystemdServiceControl::with_binary("/nonexistent/bin/systemctl");
        assert!(matches!(control.stop("adbd"), Err(Error::Service(_))));
        assert!(matches!(control.start("adbd"), Err(Error::Service(_))));
    }
}
