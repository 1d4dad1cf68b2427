//! Signal delivery for the daemon.
//!
//! The OS-level handlers installed by [`Dispatcher::install`] only record
//! that a signal arrived. The daemon's handler table runs later, from the
//! caller's loop, when [`Daemon::iterate`](crate::Daemon::iterate) or
//! [`Daemon::dispatch_pending`](crate::Daemon::dispatch_pending) is called.

use crate::{
    Daemon,
    error::{Error, Result},
};

use nix::{
    libc::c_int,
    sys::{
        signal::{self, SigHandler},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use signal_hook::{consts, iterator::Signals};
use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
    thread,
    time::Duration,
};

/// The signals the daemon recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Signal {
    Cont,
    Alrm,
    Int,
    Abrt,
    Term,
    Hup,
    Usr1,
    Chld,
    /// Always ignored unless the caller installs a handler.
    Pipe,
}

impl Signal {
    pub const ALL: [Signal; 9] = [
        Self::Cont,
        Self::Alrm,
        Self::Int,
        Self::Abrt,
        Self::Term,
        Self::Hup,
        Self::Usr1,
        Self::Chld,
        Self::Pipe,
    ];

    pub fn number(&self) -> c_int {
        match self {
            Self::Cont => consts::SIGCONT,
            Self::Alrm => consts::SIGALRM,
            Self::Int => consts::SIGINT,
            Self::Abrt => consts::SIGABRT,
            Self::Term => consts::SIGTERM,
            Self::Hup => consts::SIGHUP,
            Self::Usr1 => consts::SIGUSR1,
            Self::Chld => consts::SIGCHLD,
            Self::Pipe => consts::SIGPIPE,
        }
    }

    pub fn from_number(signo: c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == signo)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cont => "SIGCONT",
            Self::Alrm => "SIGALRM",
            Self::Int => "SIGINT",
            Self::Abrt => "SIGABRT",
            Self::Term => "SIGTERM",
            Self::Hup => "SIGHUP",
            Self::Usr1 => "SIGUSR1",
            Self::Chld => "SIGCHLD",
            Self::Pipe => "SIGPIPE",
        }
    }

    fn to_nix(self) -> signal::Signal {
        match self {
            Self::Cont => signal::Signal::SIGCONT,
            Self::Alrm => signal::Signal::SIGALRM,
            Self::Int => signal::Signal::SIGINT,
            Self::Abrt => signal::Signal::SIGABRT,
            Self::Term => signal::Signal::SIGTERM,
            Self::Hup => signal::Signal::SIGHUP,
            Self::Usr1 => signal::Signal::SIGUSR1,
            Self::Chld => signal::Signal::SIGCHLD,
            Self::Pipe => signal::Signal::SIGPIPE,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<c_int> for Signal {
    type Error = Error;

    fn try_from(signo: c_int) -> Result<Self> {
        Self::from_number(signo).ok_or(Error::UnknownSignal(signo))
    }
}

/// A caller-supplied signal handler.
pub type HandlerFn = dyn Fn(&mut Daemon, Signal) + Send + Sync;

/// What to do when a signal is delivered.
#[derive(Clone)]
pub enum Handler {
    /// The daemon's built-in behavior for the signal.
    Default,
    /// Discard the signal.
    Ignore,
    Custom(Arc<HandlerFn>),
}

impl Handler {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&mut Daemon, Signal) + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Ignore => f.write_str("Ignore"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// The signal handler table.
pub struct Dispatcher {
    table: BTreeMap<Signal, Handler>,
    signals: Option<Signals>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        let table = Signal::ALL
            .into_iter()
            .map(|signal| {
                let handler = match signal {
                    Signal::Pipe => Handler::Ignore,
                    _ => Handler::Default,
                };
                (signal, handler)
            })
            .collect();

        Self {
            table,
            signals: None,
        }
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("table", &self.table)
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_installed(&self) -> bool {
        self.signals.is_some()
    }

    /// Replaces the handler for a signal.
    ///
    /// Handlers can only be replaced before they are installed.
    pub fn set(&mut self, signal: Signal, handler: Handler) -> Result<()> {
        if self.is_installed() {
            return Err(Error::SignalsInstalled);
        }

        self.table.insert(signal, handler);
        Ok(())
    }

    /// Replaces the handler for a raw signal number.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::signal::{Dispatcher, Handler};
    ///
    /// let mut dispatcher = Dispatcher::new();
    ///
    /// assert!(dispatcher.set_raw(nix::libc::SIGUSR1, Handler::Ignore).is_ok());
    /// assert!(dispatcher.set_raw(nix::libc::SIGWINCH, Handler::Ignore).is_err());
    /// ```
    pub fn set_raw(&mut self, signo: c_int, handler: Handler) -> Result<()> {
        self.set(Signal::try_from(signo)?, handler)
    }

    pub fn handler(&self, signal: Signal) -> Handler {
        self.table.get(&signal).cloned().unwrap_or(Handler::Default)
    }

    /// Installs process-level handlers for every entry in the table.
    pub fn install(&mut self) -> Result<()> {
        if self.is_installed() {
            return Ok(());
        }

        let mut numbers = Vec::new();

        for (signal, handler) in &self.table {
            if matches!(handler, Handler::Ignore) {
                unsafe { signal::signal(signal.to_nix(), SigHandler::SigIgn) }
                    .map_err(|errno| Error::sys("signal", errno))?;
            } else {
                numbers.push(signal.number());
            }
        }

        let signals = Signals::new(&numbers).map_err(|err| Error::Sys {
            call: "sigaction",
            errno: err
                .raw_os_error()
                .map(nix::errno::Errno::from_raw)
                .unwrap_or(nix::errno::Errno::UnknownErrno),
        })?;

        self.signals = Some(signals);
        Ok(())
    }

    /// Signals that arrived since the last call, in arrival order.
    pub fn pending(&mut self) -> Vec<Signal> {
        let Some(signals) = self.signals.as_mut() else {
            return Vec::new();
        };

        signals.pending().filter_map(Signal::from_number).collect()
    }
}

/// Reaps every terminated child without blocking.
///
/// Returns the number of children reaped.
pub fn reap_children() -> usize {
    let mut reaped = 0;

    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => {
                reaped += 1;
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    reaped
}
