//! System property store access
//!
//! Recovery reads two values from the property store (the build-debuggable
//! flag and the USB controller name) and writes the `ctl.start`/`ctl.stop`
//! directives the init process turns into service transitions.

use common::{Error, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Property holding `1` on debuggable builds
pub const DEBUGGABLE_PROPERTY: &str = "ro.debuggable";

/// Property naming the UDC the configfs gadget binds to
pub const USB_CONTROLLER_PROPERTY: &str = "sys.usb.controller";

/// Key/value property store
pub trait PropertyStore: Send + Sync {
    /// Read a property. Unset and empty properties both read as `None`.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a property
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// True when `key` holds exactly `1`
    fn get_flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v == "1")
    }
}

/// Property store backed by the `getprop`/`setprop` tools
#[derive(Debug, Clone)]
pub struct SystemProperties {
    getprop: PathBuf,
    setprop: PathBuf,
}

impl Default for SystemProperties {
    fn default() -> Self {
        Self {
            getprop: PathBuf::from("getprop"),
            setprop: PathBuf::from("setprop"),
        }
    }
}

impl SystemProperties {
    /// Use explicit tool paths instead of resolving them through `PATH`
    pub fn with_tools(getprop: impl Into<PathBuf>, setprop: impl Into<PathBuf>) -> Self {
        Self {
            getprop: getprop.into(),
            setprop: setprop.into(),
        }
    }
}

impl PropertyStore for SystemProperties {
    fn get(&self, key: &str) -> Option<String> {
        let output = match Command::new(&self.getprop).arg(key).output() {
            Ok(output) => output,
            Err(e) => {
                debug!("getprop {} failed: {}", key, e);
                return None;
            }
        };

        if !output.status.success() {
            return None;
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() { None } else { Some(value) }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let status = Command::new(&self.setprop)
            .arg(key)
            .arg(value)
            .status()
            .map_err(|e| Error::Property(format!("Failed to run setprop {}: {}", key, e)))?;

        if !status.success() {
            return Err(Error::Property(format!(
                "setprop {} {} exited with {}",
                key, value, status
            )));
        }

        Ok(())
    }
}
