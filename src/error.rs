//! Error types.

use nix::errno::Errno;
use std::{io, path::PathBuf};

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A problem with a single option value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    /// No definition exists for the option.
    #[error("unknown option '{0}'")]
    Unknown(String),

    /// The value matches none of the option's type alternatives.
    #[error("option '{name}' should be of type '{kind}', got {value}")]
    Invalid {
        name: String,
        kind: String,
        value: String,
    },

    /// A required option has no value and no usable default.
    #[error("required option '{0}' is not set and has no usable default")]
    Missing(String),
}

impl OptionError {
    /// The option the problem is about.
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown(name) | Self::Missing(name) => name,
            Self::Invalid { name, .. } => name,
        }
    }
}

/// Errors raised while configuring, daemonizing or installing a service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more option values failed validation.
    #[error("invalid configuration: {}", list(.0))]
    Options(Vec<OptionError>),

    /// An option type string could not be parsed.
    #[error("invalid option type '{kind}': {reason}")]
    Type { kind: String, reason: String },

    /// A configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The process cannot be daemonized in its current condition.
    #[error("cannot daemonize: {0}")]
    Prerequisite(String),

    /// Another live instance owns the pid file.
    #[error("already running with pid {pid}")]
    AlreadyRunning { pid: i32 },

    /// The pid file path is not inside an application named directory.
    #[error("pid file location '{}' is not valid: {reason}", .path.display())]
    PidLocation { path: PathBuf, reason: String },

    /// Reading, writing or removing the pid file failed.
    #[error("pid file '{}': {source}", .path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A system call failed.
    #[error("{call} failed: {errno}")]
    Sys { call: &'static str, errno: Errno },

    /// Switching to the configured user or group failed.
    #[error("identity change failed: {0}")]
    Identity(String),

    /// The signal number is not one the dispatcher recognizes.
    #[error("signal {0} is not handled by the dispatcher")]
    UnknownSignal(i32),

    /// Handlers may only be replaced before they are installed.
    #[error("signal handlers are already installed")]
    SignalsInstalled,

    /// The host platform has no autostart support.
    #[error("platform not supported: {0}")]
    Unsupported(String),

    /// A property needed to forge the autostart script is absent or unusable.
    #[error("cannot forge autostart script: {0}")]
    AutoRun(String),

    /// An autostart script is already installed.
    #[error("autostart script '{}' already exists", .0.display())]
    AutoRunExists(PathBuf),

    /// Generic I/O failure on a path.
    #[error("'{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A record was logged at a process-terminating severity.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn sys(call: &'static str, errno: Errno) -> Self {
        Self::Sys { call, errno }
    }
}

fn list(errors: &[OptionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_error_lists_every_problem() {
        let err = Error::Options(vec![
            OptionError::Missing("appName".into()),
            OptionError::Unknown("colour".into()),
        ]);

        let message = err.to_string();
        assert!(message.contains("'appName'"));
        assert!(message.contains("'colour'"));
    }

    #[test]
    fn invalid_names_option_and_type() {
        let err = OptionError::Invalid {
            name: "appRunAsUID".into(),
            kind: "number/0-65000".into(),
            value: "70000".into(),
        };

        let message = err.to_string();
        assert!(message.contains("appRunAsUID"));
        assert!(message.contains("number/0-65000"));
    }

    #[test]
    fn sys_error_names_call() {
        let err = Error::sys("fork", Errno::EAGAIN);
        assert!(err.to_string().starts_with("fork failed"));
    }
}
