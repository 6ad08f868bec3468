//! USB gadget driver switch
//!
//! The peripheral role is toggled through one of two kernel control surfaces:
//!
//! - the legacy `android_usb` sysfs node, which takes `1` or `0`
//! - the configfs gadget `UDC` attribute, which binds the gadget when given a
//!   controller name and unbinds it when given `none`
//!
//! The surface is probed on every call by whichever node opens for writing
//! first. The two write protocols are not interchangeable: writing `1` to a
//! `UDC` attribute or a controller name to the sysfs node is silently ignored.
//!
//! Toggling is best-effort. Failures are logged and never returned, so the
//! session can still restore whatever state it can.

use crate::props::{PropertyStore, USB_CONTROLLER_PROPERTY};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::IntoRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Legacy android_usb enable node
pub const LEGACY_ENABLE_NODE: &str = "/sys/class/android_usb/android0/enable";

/// Configfs gadget UDC binding attribute
pub const CONFIGFS_UDC_NODE: &str = "/config/usb_gadget/g1/UDC";

/// Token that unbinds a configfs gadget from its controller
pub const CONFIGFS_UNBIND: &str = "none";

/// Control surface selected by the last probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverVariant {
    /// `android_usb` sysfs enable node
    Legacy,
    /// configfs gadget `UDC` attribute
    Configfs,
}

impl DriverVariant {
    /// Bytes to write for the requested state
    ///
    /// `controller` is only consulted when binding a configfs gadget.
    pub fn payload(self, enabled: bool, controller: impl FnOnce() -> String) -> Vec<u8> {
        match (self, enabled) {
            (DriverVariant::Legacy, true) => b"1".to_vec(),
            (DriverVariant::Legacy, false) => b"0".to_vec(),
            (DriverVariant::Configfs, true) => controller().into_bytes(),
            (DriverVariant::Configfs, false) => CONFIGFS_UNBIND.as_bytes().to_vec(),
        }
    }
}

/// Enables and disables the USB gadget
#[derive(Debug, Clone)]
pub struct DriverSwitch {
    legacy_node: PathBuf,
    configfs_node: PathBuf,
    controller_property: String,
}

impl Default for DriverSwitch {
    fn default() -> Self {
        Self::new(LEGACY_ENABLE_NODE, CONFIGFS_UDC_NODE)
    }
}

impl DriverSwitch {
    /// Create a switch over the given control nodes
    pub fn new(legacy_node: impl Into<PathBuf>, configfs_node: impl Into<PathBuf>) -> Self {
        Self {
            legacy_node: legacy_node.into(),
            configfs_node: configfs_node.into(),
            controller_property: USB_CONTROLLER_PROPERTY.to_string(),
        }
    }

    /// Read the controller name from a different property
    pub fn with_controller_property(mut self, key: impl Into<String>) -> Self {
        self.controller_property = key.into();
        self
    }

    pub fn legacy_node(&self) -> &Path {
        &self.legacy_node
    }

    pub fn configfs_node(&self) -> &Path {
        &self.configfs_node
    }

    /// Enable or disable the gadget
    ///
    /// Returns the control surface that was written to, or `None` when
    /// neither node could be opened.
    pub fn set_enabled(&self, enabled: bool, props: &dyn PropertyStore) -> Option<DriverVariant> {
        let (variant, mut file) = self.probe()?;

        let payload = variant.payload(enabled, || {
            props
                .get(&self.controller_property)
                .unwrap_or_else(|| CONFIGFS_UNBIND.to_string())
        });

        match file.write_all(&payload) {
            Ok(()) => debug!(
                "USB driver {} via {:?} ({})",
                if enabled { "enabled" } else { "disabled" },
                variant,
                String::from_utf8_lossy(&payload)
            ),
            Err(e) => warn!("Failed to set driver control: {}", e),
        }

        close_node(file);
        Some(variant)
    }

    /// Open whichever control surface accepts writes, legacy first
    fn probe(&self) -> Option<(DriverVariant, File)> {
        match open_node(&self.legacy_node) {
            Ok(file) => return Some((DriverVariant::Legacy, file)),
            Err(e) => debug!(
                "Failed to open sysfs USB node {} ({}), trying configfs",
                self.legacy_node.display(),
                e
            ),
        }

        match open_node(&self.configfs_node) {
            Ok(file) => Some((DriverVariant::Configfs, file)),
            Err(e) => {
                warn!(
                    "Failed to open configfs USB node {} ({}), USB driver left untouched",
                    self.configfs_node.display(),
                    e
                );
                None
            }
        }
    }
}

fn open_node(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).truncate(true).open(path)
}

/// Close explicitly so a failed close is reported instead of dropped
fn close_node(file: File) {
    if let Err(e) = nix::unistd::close(file.into_raw_fd()) {
        warn!("Failed to close driver control: {}", e);
    }
}
