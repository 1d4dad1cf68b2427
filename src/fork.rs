use crate::{
    error::{Error, Result},
    log::Logger,
};

use nix::unistd::{self, ForkResult, Pid, setsid};
use std::process::exit;

/// Which continuation of a fork the caller is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Parent { child: Pid },
    Child,
}

fn fork_once() -> Result<Side> {
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => Ok(Side::Parent { child }),
        Ok(ForkResult::Child) => Ok(Side::Child),
        Err(errno) => Err(Error::sys("fork", errno)),
    }
}

/// Detaches from the controlling terminal.
///
/// The original process logs the new child and exits at once; the child
/// starts a new session and forks a second time so that it can never
/// reacquire a terminal. Only the final process returns, with its own pid.
pub fn detach(log: &Logger) -> Result<Pid> {
    match fork_once()? {
        Side::Parent { child } => {
            log.notice(format!("forked into background as pid {child}"));
            exit(0);
        }
        Side::Child => (),
    }

    setsid().map_err(|errno| Error::sys("setsid", errno))?;

    match fork_once()? {
        Side::Parent { .. } => exit(0),
        Side::Child => Ok(unistd::getpid()),
    }
}
