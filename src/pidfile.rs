//! The pid file: the on-disk record of the running instance.

use crate::error::{Error, Result};

use nix::{
    errno::Errno,
    sys::signal::kill,
    unistd::Pid,
};
use std::{
    fs::{self, DirBuilder, Permissions},
    io::{ErrorKind, Write},
    os::unix::fs::{DirBuilderExt, PermissionsExt},
    path::{Component, Path},
};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Checks that the pid file lives in its own directory named after the
/// application, e.g. `/var/run/logparser/logparser.pid`.
///
/// # Examples
///
/// ```
/// use sysdaemon::pidfile;
///
/// assert!(pidfile::validate_location("/var/run/svc/svc.pid", "svc").is_ok());
/// assert!(pidfile::validate_location("/var/run/svc.pid", "svc").is_err());
/// assert!(pidfile::validate_location("/var/run/other/svc.pid", "svc").is_err());
/// ```
pub fn validate_location<P: AsRef<Path>>(path: P, app_name: &str) -> Result<()> {
    let path = path.as_ref();
    let reject = |reason: String| {
        Err(Error::PidLocation {
            path: path.to_path_buf(),
            reason,
        })
    };

    if !path.is_absolute() {
        return reject("path must be absolute".into());
    }

    let depth = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    if depth < 3 || path.components().any(|c| c == Component::ParentDir) {
        return reject(format!(
            "it should have its own directory, e.g. /var/run/{app_name}/{app_name}.pid"
        ));
    }

    let parent = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str());
    if parent != Some(app_name) {
        return reject(format!(
            "the parent directory should be named '{app_name}'"
        ));
    }

    Ok(())
}

/// Reads the recorded pid. A missing file reads as `None`.
pub fn read<P: AsRef<Path>>(path: P) -> Result<Option<Pid>> {
    let path = path.as_ref();

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::PidFile {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(Pid::from_raw(pid))),
        _ => Ok(None),
    }
}

/// Writes `pid` to `path`, creating parent directories as needed.
pub fn write<P: AsRef<Path>>(path: P, pid: Pid) -> Result<()> {
    let path = path.as_ref();
    let wrap = |source| Error::PidFile {
        path: path.to_path_buf(),
        source,
    };

    if pid.as_raw() < 1 {
        return Err(wrap(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("refusing to record invalid pid {pid}"),
        )));
    }

    if let Some(parent) = path.parent() {
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(parent)
            .map_err(wrap)?;
    }

    let mut file = fs::File::create(path).map_err(wrap)?;
    write!(file, "{pid}").map_err(wrap)?;
    fs::set_permissions(path, Permissions::from_mode(FILE_MODE)).map_err(wrap)?;

    Ok(())
}

/// Removes the pid file. A file that is already gone is not an error.
pub fn remove<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::PidFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Sends the null signal to `pid` to see whether it still exists.
pub fn is_alive(pid: Pid) -> bool {
    match kill(pid, None) {
        Ok(()) => true,
        // The process exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
