//! Recovery sideload configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sideload::driver::{CONFIGFS_UDC_NODE, LEGACY_ENABLE_NODE};
use sideload::props::{DEBUGGABLE_PROPERTY, USB_CONTROLLER_PROPERTY};
use sideload::sentinel::{DEFAULT_ARRIVAL_PATH, DEFAULT_EXIT_PATH};
use sideload::service::DEBUG_DAEMON;
use sideload::supervisor::{DEFAULT_HELPER, DEFAULT_HELPER_ARG0, DEFAULT_MODE_FLAG};
use sideload::{SentinelPaths, SessionConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub sideload: SideloadSettings,
    #[serde(default)]
    pub install: InstallSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "RecoverySettings::default_log_level")]
    pub log_level: String,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl RecoverySettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// USB gadget control surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Legacy android_usb enable node
    #[serde(default = "UsbSettings::default_legacy_node")]
    pub legacy_node: PathBuf,
    /// Configfs gadget UDC attribute
    #[serde(default = "UsbSettings::default_configfs_node")]
    pub configfs_node: PathBuf,
    /// Property holding the controller name to bind on configfs
    #[serde(default = "UsbSettings::default_controller_property")]
    pub controller_property: String,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            legacy_node: Self::default_legacy_node(),
            configfs_node: Self::default_configfs_node(),
            controller_property: Self::default_controller_property(),
        }
    }
}

impl UsbSettings {
    fn default_legacy_node() -> PathBuf {
        PathBuf::from(LEGACY_ENABLE_NODE)
    }

    fn default_configfs_node() -> PathBuf {
        PathBuf::from(CONFIGFS_UDC_NODE)
    }

    fn default_controller_property() -> String {
        USB_CONTROLLER_PROPERTY.to_string()
    }
}

/// How service directives reach the process supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceBackend {
    /// `ctl.start` / `ctl.stop` properties (Android init)
    #[default]
    Property,
    /// `systemctl start` / `systemctl stop`
    Systemd,
}

/// Debug bridge daemon handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "DaemonSettings::default_name")]
    pub name: String,
    /// Property that marks a debuggable build; the daemon is only restarted there
    #[serde(default = "DaemonSettings::default_debuggable_property")]
    pub debuggable_property: String,
    #[serde(default)]
    pub control: ServiceBackend,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            debuggable_property: Self::default_debuggable_property(),
            control: ServiceBackend::default(),
        }
    }
}

impl DaemonSettings {
    fn default_name() -> String {
        DEBUG_DAEMON.to_string()
    }

    fn default_debuggable_property() -> String {
        DEBUGGABLE_PROPERTY.to_string()
    }
}

/// Sideload helper and sentinel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideloadSettings {
    #[serde(default = "SideloadSettings::default_helper")]
    pub helper: PathBuf,
    #[serde(default = "SideloadSettings::default_helper_arg0")]
    pub helper_arg0: String,
    #[serde(default = "SideloadSettings::default_mode_flag")]
    pub mode_flag: String,
    #[serde(default = "SideloadSettings::default_arrival_path")]
    pub arrival_path: PathBuf,
    #[serde(default = "SideloadSettings::default_exit_path")]
    pub exit_path: PathBuf,
    /// How long to wait for the host to start sending, in seconds
    #[serde(default = "SideloadSettings::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "SideloadSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SideloadSettings {
    fn default() -> Self {
        Self {
            helper: Self::default_helper(),
            helper_arg0: Self::default_helper_arg0(),
            mode_flag: Self::default_mode_flag(),
            arrival_path: Self::default_arrival_path(),
            exit_path: Self::default_exit_path(),
            timeout_secs: Self::default_timeout_secs(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl SideloadSettings {
    fn default_helper() -> PathBuf {
        PathBuf::from(DEFAULT_HELPER)
    }

    fn default_helper_arg0() -> String {
        DEFAULT_HELPER_ARG0.to_string()
    }

    fn default_mode_flag() -> String {
        DEFAULT_MODE_FLAG.to_string()
    }

    fn default_arrival_path() -> PathBuf {
        PathBuf::from(DEFAULT_ARRIVAL_PATH)
    }

    fn default_exit_path() -> PathBuf {
        PathBuf::from(DEFAULT_EXIT_PATH)
    }

    fn default_timeout_secs() -> u64 {
        300 // 5 minutes
    }

    fn default_poll_interval_ms() -> u64 {
        1000
    }

    /// Number of poll ticks covering the timeout, rounded up
    ///
    /// Saturates at `u32::MAX` for timeouts too large to count.
    pub fn timeout_ticks(&self) -> u32 {
        let ticks = self
            .timeout_secs
            .saturating_mul(1000)
            .div_ceil(self.poll_interval_ms.max(1));
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

/// Install collaborator invoked once a package arrives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallSettings {
    /// Shell command run with the package path appended
    #[serde(default)]
    pub command: Option<String>,
}

impl RecoveryConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/sideload-recovery/recovery.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: RecoveryConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("sideload-recovery").join("recovery.toml")
        } else {
            PathBuf::from(".config/sideload-recovery/recovery.toml")
        }
    }

    /// Session parameters derived from the `[sideload]` section
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sentinels: SentinelPaths::new(&self.sideload.arrival_path, &self.sideload.exit_path),
            timeout_ticks: self.sideload.timeout_ticks(),
            poll_interval: Duration::from_millis(self.sideload.poll_interval_ms),
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.recovery.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.recovery.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.sideload.timeout_secs == 0 {
            return Err(anyhow!("sideload.timeout_secs must be greater than 0"));
        }

        if self.sideload.poll_interval_ms == 0 {
            return Err(anyhow!("sideload.poll_interval_ms must be greater than 0"));
        }

        let paths = [
            ("usb.legacy_node", &self.usb.legacy_node),
            ("usb.configfs_node", &self.usb.configfs_node),
            ("sideload.helper", &self.sideload.helper),
            ("sideload.arrival_path", &self.sideload.arrival_path),
            ("sideload.exit_path", &self.sideload.exit_path),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("{} must not be empty", name));
            }
        }

        if self.sideload.arrival_path == self.sideload.exit_path {
            return Err(anyhow!(
                "sideload.arrival_path and sideload.exit_path must differ"
            ));
        }

        if self.daemon.name.is_empty() {
            return Err(anyhow!("daemon.name must not be empty"));
        }

        if matches!(&self.install.command, Some(cmd) if cmd.trim().is_empty()) {
            return Err(anyhow!("install.command must not be empty when set"));
        }

        Ok(())
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}
