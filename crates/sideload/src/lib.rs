//! Recovery sideload session controller
//!
//! Drives a one-shot `adb sideload` transfer into recovery: the debug daemon
//! is stopped and the USB gadget enabled, a helper process serving the
//! sideload mount is spawned and supervised, and the arrival of the host's
//! package is detected by polling a sentinel path. Every path that does not
//! hand the package off restores the gadget and daemon before returning.
//!
//! The property store, service supervisor, helper process and the mount are
//! all reached through traits so sessions can be driven deterministically in
//! tests (see [`test_utils`]).

pub mod context;
pub mod driver;
pub mod lock;
pub mod outcome;
pub mod poller;
pub mod props;
pub mod sentinel;
pub mod service;
pub mod session;
pub mod supervisor;
pub mod test_utils;

pub use context::UsbDebugContext;
pub use driver::{DriverSwitch, DriverVariant};
pub use lock::{SessionGuard, SessionLock};
pub use outcome::OutcomeCode;
pub use poller::{ArrivalPoller, PollOutcome, Sleeper, ThreadSleeper};
pub use props::{PropertyStore, SystemProperties};
pub use sentinel::{FsProbe, SentinelPaths, SentinelProbe};
pub use service::{PropertyServiceControl, ServiceControl, SystemdServiceControl};
pub use session::{SessionConfig, SessionOutcome, SideloadHandoff, SideloadSession};
pub use supervisor::{ChildProcess, ChildSlot, ExitKind, HelperSpawner, SessionHandle, Spawner};
