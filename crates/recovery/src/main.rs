//! sideload-recovery
//!
//! Runs a single `adb sideload` session from the recovery environment: the
//! debug daemon is taken off the USB gadget, the sideload helper is started,
//! and once the host begins streaming the package is handed to the configured
//! install command before USB state is restored.

mod config;
mod install;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use config::{RecoveryConfig, ServiceBackend, expand_path};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sideload::{
    ChildSlot, DriverSwitch, FsProbe, HelperSpawner, OutcomeCode, PropertyServiceControl,
    PropertyStore, ServiceControl, SessionOutcome, SideloadSession, SystemProperties,
    SystemdServiceControl, ThreadSleeper, UsbDebugContext,
};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

/// How often a pending Ctrl+C kill rechecks for the helper pid
const KILL_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "sideload-recovery")]
#[command(
    author,
    version,
    about = "Receive a package over adb sideload in recovery"
)]
#[command(long_about = "
Waits for a host to run \"adb sideload <file>\" against this device, then hands
the arriving package to an install command.

EXAMPLES:
    # Wait for a sideload using the default config
    sideload-recovery /tmp/update.zip

    # Install the package once it arrives
    sideload-recovery --install-command /sbin/install-package /tmp/update.zip

    # Run with debug logging
    sideload-recovery --log-level debug /tmp/update.zip

CONFIGURATION:
    Configuration files are searched in the following order:
    1. Path specified with --config
    2. ~/.config/sideload-recovery/recovery.toml
    3. /etc/sideload-recovery/recovery.toml
    4. Built-in defaults

EXIT STATUS:
    0  package received (and installed, if an install command is set)
    1  sideload failed or timed out
    2  host adb is too old to sideload to this device
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Command run with the arriving package path (overrides install.command)
    #[arg(long, value_name = "CMD")]
    install_command: Option<String>,

    /// Install file path handed to the sideload helper
    #[arg(value_name = "INSTALL_FILE", required_unless_present = "save_config")]
    install_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.save_config {
        let config = RecoveryConfig::default();
        let path = RecoveryConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = if let Some(ref path) = args.config {
        RecoveryConfig::load(Some(expand_path(path))).context("Failed to load configuration")?
    } else {
        RecoveryConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.recovery.log_level.clone());
    setup_logging(&log_level).context("Failed to setup logging")?;

    info!("sideload-recovery v{}", env!("CARGO_PKG_VERSION"));

    if let Some(command) = args.install_command {
        config.install.command = Some(command);
    }

    let install_file = args
        .install_file
        .map(|p| expand_path(&p))
        .ok_or_else(|| anyhow!("INSTALL_FILE is required"))?;

    let outcome = run(&config, install_file).await?;
    info!("Sideload result: {} ({})", outcome, outcome.code());
    Ok(ExitCode::from(exit_status(outcome)))
}

/// Run one session and, on handoff, the install step and restore
async fn run(config: &RecoveryConfig, install_file: PathBuf) -> Result<OutcomeCode> {
    let session = build_session(config);
    let slot = session.child_slot();

    let mut task = tokio::task::spawn_blocking(move || {
        let mut sleeper = ThreadSleeper;
        session.run(&install_file, &mut sleeper)
    });

    let joined = join_interruptible(&mut task, &slot, signal::ctrl_c).await;

    let outcome = joined
        .context("Sideload session task panicked")?
        .context("Failed to start sideload session")?;

    let handoff = match outcome {
        SessionOutcome::Finished(code) => return Ok(code),
        SessionOutcome::Handoff(handoff) => handoff,
    };

    let installed = match &config.install.command {
        Some(command) => match install::run_install(command, handoff.package_path()).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("{:#}", e);
                false
            }
        },
        None => {
            warn!("No install command configured, package left uninstalled");
            true
        }
    };

    let finished = tokio::task::spawn_blocking(move || handoff.finish())
        .await
        .context("Sideload finish task panicked")?;

    Ok(if installed {
        finished
    } else {
        OutcomeCode::GenericError
    })
}

/// Await `task`, killing the published helper on every interrupt
///
/// An interrupt that lands before the helper pid is published is remembered
/// and the kill retried until the pid shows up or the task ends.
async fn join_interruptible<T, F, Fut>(
    task: &mut JoinHandle<T>,
    slot: &ChildSlot,
    mut interrupt: F,
) -> std::result::Result<T, JoinError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut pending_kill = false;
    let mut listening = true;
    let mut retry = tokio::time::interval(KILL_RETRY_INTERVAL);

    loop {
        tokio::select! {
            joined = &mut *task => return joined,
            interrupted = interrupt(), if listening => match interrupted {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping sideload helper...");
                    pending_kill = !kill_helper(slot);
                }
                Err(e) => {
                    error!("Error waiting for Ctrl+C: {}", e);
                    listening = false;
                }
            },
            _ = retry.tick(), if pending_kill => {
                if slot.get().is_some() {
                    pending_kill = !kill_helper(slot);
                }
            }
        }
    }
}

fn build_session(config: &RecoveryConfig) -> SideloadSession {
    let props: Arc<dyn PropertyStore> = Arc::new(SystemProperties::default());
    let services: Arc<dyn ServiceControl> = match config.daemon.control {
        ServiceBackend::Property => Arc::new(PropertyServiceControl::new(props.clone())),
        ServiceBackend::Systemd => Arc::new(SystemdServiceControl::default()),
    };

    let driver = DriverSwitch::new(&config.usb.legacy_node, &config.usb.configfs_node)
        .with_controller_property(&config.usb.controller_property);

    let ctx = UsbDebugContext::new(props, services, driver)
        .with_daemon(&config.daemon.name)
        .with_debuggable_property(&config.daemon.debuggable_property);

    let spawner = HelperSpawner::new(
        &config.sideload.helper,
        &config.sideload.helper_arg0,
        &config.sideload.mode_flag,
    );

    SideloadSession::new(ctx, Arc::new(spawner), Arc::new(FsProbe))
        .with_config(config.session_config())
}

/// Kill the helper published in `slot`
///
/// Returns `false` when no helper has been published yet.
fn kill_helper(slot: &ChildSlot) -> bool {
    let Some(pid) = slot.get() else {
        warn!("No sideload helper running yet, will kill it once started");
        return false;
    };

    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
                error!("Failed to kill sideload helper {}: {}", pid, e);
            }
        }
        Err(_) => error!("Invalid sideload helper pid {}", pid),
    }
    true
}

/// Process exit status for a session outcome
fn exit_status(outcome: OutcomeCode) -> u8 {
    match outcome {
        OutcomeCode::Success => 0,
        OutcomeCode::GenericError | OutcomeCode::TimedOut => 1,
        OutcomeCode::ProtocolVersionError => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sideload::{ExitKind, SessionHandle, Spawner};

    #[test]
    fn test_args_require_install_file() {
        assert!(Args::try_parse_from(["sideload-recovery"]).is_err());
        assert!(Args::try_parse_from(["sideload-recovery", "--save-config"]).is_ok());

        let args = Args::try_parse_from([
            "sideload-recovery",
            "--install-command",
            "/sbin/install-package",
            "/tmp/update.zip",
        ])
        .unwrap();
        assert_eq!(args.install_file, Some(PathBuf::from("/tmp/update.zip")));
        assert_eq!(args.install_command.as_deref(), Some("/sbin/install-package"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_status(OutcomeCode::Success), 0);
        assert_eq!(exit_status(OutcomeCode::TimedOut), 1);
        assert_eq!(exit_status(OutcomeCode::GenericError), 1);
        assert_eq!(exit_status(OutcomeCode::ProtocolVersionError), 2);
    }

    #[test]
    fn test_kill_helper_without_child() {
        assert!(!kill_helper(&ChildSlot::new()));
    }

    #[tokio::test]
    async fn test_early_interrupt_kills_helper_once_published() {
        let slot = ChildSlot::new();
        let task_slot = slot.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(200));
            // `sleep 30 1` stays up long enough to need the kill
            let spawner = HelperSpawner::new("sleep", "sleep", "30");
            let child = spawner.spawn(std::path::Path::new("1")).unwrap();
            let mut handle = SessionHandle::new(child, task_slot);
            handle.wait().unwrap()
        });

        let mut interrupts = 0;
        let joined = join_interruptible(&mut task, &slot, || {
            interrupts += 1;
            let first = interrupts == 1;
            async move {
                if !first {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(joined, ExitKind::Signaled(9));
        assert_eq!(slot.get(), None);
    }

    #[tokio::test]
    async fn test_join_without_interrupt() {
        let slot = ChildSlot::new();
        let mut task = tokio::task::spawn_blocking(|| 7);
        let joined = join_interruptible(&mut task, &slot, || std::future::pending())
            .await
            .unwrap();
        assert_eq!(joined, 7);
    }
}
