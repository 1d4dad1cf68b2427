use crate::error::{Error, Result};

use nix::{
    fcntl::{self, OFlag},
    sys::stat::Mode,
    unistd::{dup2_stderr, dup2_stdin, dup2_stdout},
};
use std::{os::fd::OwnedFd, path::Path};

const DEV_NULL: &str = "/dev/null";

/// Points stdin, stdout and stderr at `/dev/null`.
///
/// Once in the background nothing reads the terminal; diagnostics go to the
/// log file instead.
pub fn detach_stdio() -> Result<()> {
    dup2_stdin(open(OFlag::O_RDONLY)?)
        .map_err(|errno| Error::sys("dup2(stdin)", errno))?;
    dup2_stdout(open(OFlag::O_WRONLY)?)
        .map_err(|errno| Error::sys("dup2(stdout)", errno))?;
    dup2_stderr(open(OFlag::O_WRONLY)?)
        .map_err(|errno| Error::sys("dup2(stderr)", errno))?;

    Ok(())
}

fn open(flags: OFlag) -> Result<OwnedFd> {
    fcntl::open(Path::new(DEV_NULL), flags, Mode::empty())
        .map_err(|errno| Error::io(DEV_NULL, errno.into()))
}
