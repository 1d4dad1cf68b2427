//! Turn a foreground process into a supervised Unix daemon.
//!
//! A [`Daemon`] validates its [`Options`], forks into the background,
//! records itself in a pid file, drops to the configured user and group and
//! then hands signals to the caller's loop. The [`os::Driver`] forges an
//! init script for the host from the same options.

mod daemon;
mod error;
mod fork;
mod fs;
mod log;
#[cfg(feature = "serde")]
mod serde;

pub mod options;
pub mod os;
pub mod pidfile;
pub mod signal;
pub mod user;

pub use daemon::{Daemon, State};
pub use error::{Error, OptionError, Result};
pub use log::{Escalation, Level, Logger};
pub use options::{OptionDef, Options, Value};
pub use os::{Driver, OsDescriptor, Platform};
pub use signal::{Dispatcher, Handler, Signal};

pub use nix;
