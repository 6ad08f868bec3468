//! Device-wide USB debug state
//!
//! [`UsbDebugContext`] bundles the process-wide resources a session mutates:
//! the gadget driver, the debug daemon and the property store. It is passed
//! in explicitly, and its [`SessionLock`] keeps a second session from
//! touching them concurrently.

use crate::driver::{DriverSwitch, DriverVariant};
use crate::lock::SessionLock;
use crate::props::{DEBUGGABLE_PROPERTY, PropertyStore};
use crate::service::{DEBUG_DAEMON, ServiceControl};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct UsbDebugContext {
    props: Arc<dyn PropertyStore>,
    services: Arc<dyn ServiceControl>,
    driver: DriverSwitch,
    daemon: String,
    debuggable_property: String,
    lock: SessionLock,
}

impl UsbDebugContext {
    pub fn new(
        props: Arc<dyn PropertyStore>,
        services: Arc<dyn ServiceControl>,
        driver: DriverSwitch,
    ) -> Self {
        Self {
            props,
            services,
            driver,
            daemon: DEBUG_DAEMON.to_string(),
            debuggable_property: DEBUGGABLE_PROPERTY.to_string(),
            lock: SessionLock::new(),
        }
    }

    /// Manage a daemon other than `adbd`
    pub fn with_daemon(mut self, name: impl Into<String>) -> Self {
        self.daemon = name.into();
        self
    }

    /// Read the debuggable flag from a different property
    pub fn with_debuggable_property(mut self, key: impl Into<String>) -> Self {
        self.debuggable_property = key.into();
        self
    }

    pub fn props(&self) -> &dyn PropertyStore {
        self.props.as_ref()
    }

    pub fn daemon(&self) -> &str {
        &self.daemon
    }

    pub fn lock(&self) -> &SessionLock {
        &self.lock
    }

    pub fn set_driver_enabled(&self, enabled: bool) -> Option<DriverVariant> {
        self.driver.set_enabled(enabled, self.props.as_ref())
    }

    pub fn is_debuggable(&self) -> bool {
        self.props.get_flag(&self.debuggable_property)
    }

    /// Stop the debug daemon and take the gadget down with it
    pub fn stop_daemon(&self) {
        if let Err(e) = self.services.stop(&self.daemon) {
            warn!("Failed to stop {}: {}", self.daemon, e);
        }
        self.set_driver_enabled(false);
    }

    /// Bring the debug daemon back, on debuggable builds only
    ///
    /// `debuggable` is the flag as read when the session started. Returns
    /// whether a restart was issued. User builds leave the daemon stopped
    /// after a sideload.
    pub fn maybe_restart_daemon(&self, debuggable: bool) -> bool {
        if !debuggable {
            return false;
        }

        info!("Restarting {}...", self.daemon);
        self.set_driver_enabled(true);
        if let Err(e) = self.services.start(&self.daemon) {
            warn!("Failed to start {}: {}", self.daemon, e);
        }
        true
    }

    /// Disable the gadget, then conditionally restart the daemon
    pub fn restore(&self, debuggable: bool) {
        self.set_driver_enabled(false);
        self.maybe_restart_daemon(debuggable);
    }
}
