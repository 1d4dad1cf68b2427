//! A leveled log sink for the daemon.
//!
//! Records are appended to the log file and, while the process is still in
//! the foreground, echoed to stderr so that startup failures are visible to
//! the operator. Every record is also forwarded to `tracing`.

use crate::{
    error::{Error, Result},
    options::Options,
};

use chrono::Local;
use std::{
    fmt::{self, Display, Formatter},
    fs::OpenOptions,
    io::Write,
    panic::{self, Location},
    path::PathBuf,
    process::exit,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Syslog severities, most severe first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Level {
    pub fn from_number(n: i64) -> Option<Self> {
        Some(match n {
            0 => Self::Emergency,
            1 => Self::Alert,
            2 => Self::Critical,
            3 => Self::Error,
            4 => Self::Warning,
            5 => Self::Notice,
            6 => Self::Info,
            7 => Self::Debug,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Alert => "alert",
            Self::Critical => "critical",
            Self::Error => "err",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    /// Records at these levels end the process.
    pub fn is_fatal(&self) -> bool {
        *self < Self::Critical
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// What happens after a fatal record has been written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Escalation {
    /// Exit the process with status 1.
    #[default]
    Exit,
    /// Return [`Error::Fatal`] to the caller instead.
    Return,
}

#[derive(Clone, Debug)]
pub struct Logger {
    location: Option<PathBuf>,
    verbosity: Level,
    file_position: bool,
    line_position: bool,
    echo: Arc<AtomicBool>,
    escalation: Escalation,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            location: None,
            verbosity: Level::Info,
            file_position: false,
            line_position: true,
            echo: Arc::new(AtomicBool::new(true)),
            escalation: Escalation::Exit,
        }
    }
}

impl Logger {
    /// A console-only logger.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn location<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.location = path.map(Into::into);
        self
    }

    pub fn verbosity(mut self, level: Level) -> Self {
        self.verbosity = level;
        self
    }

    pub fn positions(mut self, file: bool, line: bool) -> Self {
        self.file_position = file;
        self.line_position = line;
        self
    }

    pub fn escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// Applies the `log*` options. Missing or invalid values leave the
    /// current setting in place.
    pub fn configure(&mut self, options: &Options) {
        if let Some(path) = options.get_path("logLocation") {
            self.location = Some(path.into_owned());
        }

        if let Some(level) =
            options.get_number("logVerbosity").and_then(Level::from_number)
        {
            self.verbosity = level;
        }

        if let Some(file) = options.get_bool("logFilePosition") {
            self.file_position = file;
        }

        if let Some(line) = options.get_bool("logLinePosition") {
            self.line_position = line;
        }
    }

    pub fn get_escalation(&self) -> Escalation {
        self.escalation
    }

    pub fn log_file(&self) -> Option<&std::path::Path> {
        self.location.as_deref()
    }

    /// Turns console echo on or off for this logger and all its clones.
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::Relaxed);
    }

    pub fn is_echoing(&self) -> bool {
        self.echo.load(Ordering::Relaxed)
    }

    /// Writes a record.
    ///
    /// Fatal records exit the process, or return [`Error::Fatal`] when the
    /// logger was built with [`Escalation::Return`].
    #[track_caller]
    pub fn log<M: AsRef<str>>(&self, level: Level, message: M) -> Result<()> {
        self.write(level, message.as_ref(), Location::caller());
        self.escalate(level, message.as_ref())
    }

    #[track_caller]
    pub fn debug<M: AsRef<str>>(&self, message: M) {
        self.write(Level::Debug, message.as_ref(), Location::caller());
    }

    #[track_caller]
    pub fn info<M: AsRef<str>>(&self, message: M) {
        self.write(Level::Info, message.as_ref(), Location::caller());
    }

    #[track_caller]
    pub fn notice<M: AsRef<str>>(&self, message: M) {
        self.write(Level::Notice, message.as_ref(), Location::caller());
    }

    #[track_caller]
    pub fn warning<M: AsRef<str>>(&self, message: M) {
        self.write(Level::Warning, message.as_ref(), Location::caller());
    }

    #[track_caller]
    pub fn error<M: AsRef<str>>(&self, message: M) {
        self.write(Level::Error, message.as_ref(), Location::caller());
    }

    #[track_caller]
    pub fn critical<M: AsRef<str>>(&self, message: M) {
        self.write(Level::Critical, message.as_ref(), Location::caller());
    }

    /// Writes an emergency record and escalates it.
    ///
    /// Returns the error to propagate when escalation returns instead of
    /// exiting:
    ///
    /// ```no_run
    /// # fn run(log: &sysdaemon::Logger) -> sysdaemon::Result<()> {
    /// return Err(log.emergency("unable to fork"));
    /// # }
    /// ```
    #[track_caller]
    pub fn emergency<M: AsRef<str>>(&self, message: M) -> Error {
        let message = message.as_ref();
        self.write(Level::Emergency, message, Location::caller());

        match self.escalate(Level::Emergency, message) {
            Err(err) => err,
            Ok(()) => Error::Fatal(message.to_owned()),
        }
    }

    /// Routes panics into the log as critical records.
    pub fn reroute_panics(&self) {
        let logger = self.clone();

        panic::set_hook(Box::new(move |info| {
            let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
                (*s).to_owned()
            } else if let Some(s) = info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "panic with a non-string payload".to_owned()
            };

            let location = info.location().copied();
            logger.write_at(
                Level::Critical,
                &format!("panic: {message}"),
                location.as_ref(),
            );
        }));
    }

    /// Formats a record the way it appears in the log file.
    pub fn format(
        &self,
        level: Level,
        message: &str,
        location: Option<&Location<'_>>,
    ) -> String {
        let mut line = format!(
            "[{}] {:<9} : {}",
            Local::now().format("%b %d %H:%M:%S"),
            level,
            message
        );

        if level < Level::Notice
            && let Some(location) = location
        {
            if self.file_position {
                line.push_str(&format!(" [f:{}]", location.file()));
            }
            if self.line_position {
                line.push_str(&format!(" [l:{}]", location.line()));
            }
        }

        line
    }

    fn write(&self, level: Level, message: &str, location: &Location<'_>) {
        self.write_at(level, message, Some(location));
    }

    fn write_at(
        &self,
        level: Level,
        message: &str,
        location: Option<&Location<'_>>,
    ) {
        forward(level, message);

        if level > self.verbosity {
            return;
        }

        let line = self.format(level, message, location);

        if self.is_echoing() {
            eprintln!("{line}");
        }

        let Some(path) = &self.location else {
            return;
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));

        if let Err(err) = result {
            tracing::warn!(
                target: "sysdaemon",
                "failed to write to log file '{}': {err}",
                path.display()
            );
            if self.is_echoing() {
                eprintln!("unable to write to log file '{}': {err}", path.display());
            }
        }
    }

    fn escalate(&self, level: Level, message: &str) -> Result<()> {
        if !level.is_fatal() {
            return Ok(());
        }

        match self.escalation {
            Escalation::Exit => exit(1),
            Escalation::Return => Err(Error::Fatal(message.to_owned())),
        }
    }
}

fn forward(level: Level, message: &str) {
    match level {
        Level::Emergency | Level::Alert | Level::Critical | Level::Error => {
            tracing::error!(target: "sysdaemon", severity = level.name(), "{message}")
        }
        Level::Warning => tracing::warn!(target: "sysdaemon", "{message}"),
        Level::Notice | Level::Info => {
            tracing::info!(target: "sysdaemon", severity = level.name(), "{message}")
        }
        Level::Debug => tracing::debug!(target: "sysdaemon", "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_logger(dir: &std::path::Path) -> Logger {
        let logger = Logger::new()
            .location(Some(dir.join("svc.log")))
            .verbosity(Level::Debug)
            .escalation(Escalation::Return);
        logger.set_echo(false);
        logger
    }

    fn contents(dir: &std::path::Path) -> String {
        std::fs::read_to_string(dir.join("svc.log")).unwrap_or_default()
    }

    #[test]
    fn line_format() {
        let logger = Logger::new().positions(true, true);
        let location = Location::caller();

        let line = logger.format(Level::Warning, "disk full", Some(location));

        assert!(line.starts_with('['));
        assert!(line.contains("] warning   : disk full"));
        assert!(line.contains(&format!(" [f:{}]", location.file())));
        assert!(line.ends_with(&format!(" [l:{}]", location.line())));
    }

    #[test]
    fn positions_only_for_severe_records() {
        let logger = Logger::new().positions(true, true);

        let line = logger.format(Level::Info, "started", Some(Location::caller()));

        assert!(line.ends_with("info      : started"));
    }

    #[test]
    fn verbosity_filters_records() {
        let dir = tempfile::tempdir().unwrap();
        let logger = file_logger(dir.path()).verbosity(Level::Notice);

        logger.info("hidden");
        logger.notice("shown");

        let log = contents(dir.path());
        assert!(!log.contains("hidden"));
        assert!(log.contains("shown"));
    }

    #[test]
    fn fatal_records_escalate() {
        let dir = tempfile::tempdir().unwrap();
        let logger = file_logger(dir.path());

        assert!(logger.log(Level::Critical, "survivable").is_ok());
        assert!(matches!(
            logger.log(Level::Alert, "not survivable"),
            Err(Error::Fatal(m)) if m == "not survivable"
        ));

        let err = logger.emergency("already running");
        assert!(matches!(err, Error::Fatal(_)));
        assert!(contents(dir.path()).contains("emergency : already running"));
    }

    #[test]
    fn echo_is_shared_between_clones() {
        let logger = Logger::new();
        let clone = logger.clone();

        logger.set_echo(false);

        assert!(!clone.is_echoing());
    }

    #[test]
    fn configure_from_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.log");
        let mut options = Options::new();
        options.set("logLocation", path.as_path()).unwrap();
        options.set("logVerbosity", 3).unwrap();
        options.set("logFilePosition", true).unwrap();

        let mut logger = Logger::new();
        logger.configure(&options);

        assert_eq!(logger.log_file(), Some(path.as_path()));
        assert_eq!(logger.verbosity, Level::Error);
        assert!(logger.file_position);
    }

    #[test]
    fn level_numbers() {
        assert_eq!(Level::from_number(0), Some(Level::Emergency));
        assert_eq!(Level::from_number(7), Some(Level::Debug));
        assert_eq!(Level::from_number(8), None);
        assert!(Level::Emergency.is_fatal());
        assert!(!Level::Critical.is_fatal());
    }
}
