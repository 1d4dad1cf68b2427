use crate::{
    error::{Error, Result},
    fork, fs,
    log::{Escalation, Level, Logger},
    options::Options,
    os::Driver,
    pidfile,
    signal::{self, Dispatcher, Handler, Signal},
    user::{Group, Identity, User},
};

use nix::{
    libc::mode_t,
    sys::stat::{self, Mode},
    unistd::{self, Pid},
};
use std::{
    borrow::Cow,
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio, exit},
    thread,
    time::Duration,
};

/// Where a daemon is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Initializing,
    Forking,
    AdjustingIdentity,
    /// Detached and serving.
    Running,
    Dying,
    Terminated,
}

#[derive(Clone, Copy, Debug, Default)]
struct Process {
    pid: Option<Pid>,
    is_child: bool,
    is_dying: bool,
}

/// Supervises the conversion of the running process into a daemon.
///
/// ```no_run
/// use std::time::Duration;
/// use sysdaemon::{Daemon, Options};
///
/// # fn main() -> sysdaemon::Result<()> {
/// let mut options = Options::new();
/// options.set_all([
///     ("appName", "logparser"),
///     ("appDescription", "Parses logs"),
///     ("authorName", "Kevin van Zonneveld"),
///     ("authorEmail", "kevin@example.com"),
/// ])?;
///
/// let mut daemon = Daemon::new(options);
/// daemon.start()?;
///
/// while !daemon.is_dying() {
///     // One unit of work.
///     daemon.iterate(Duration::from_secs(2))?;
/// }
///
/// daemon.stop()
/// # }
/// ```
#[derive(Debug)]
pub struct Daemon {
    options: Options,
    log: Logger,
    signals: Dispatcher,
    process: Process,
    state: State,
    /// What [`Self::restart`] launches.
    program: Option<PathBuf>,
    args: Vec<OsString>,
}

impl Daemon {
    pub fn new(options: Options) -> Self {
        let mut log = Logger::new();
        log.configure(&options);

        Self {
            options,
            log,
            signals: Dispatcher::new(),
            process: Process::default(),
            state: State::Unconfigured,
            program: env::current_exe().ok(),
            args: env::args_os().skip(1).collect(),
        }
    }

    #[cfg(test)]
    fn relaunch<P, I, S>(mut self, program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.program = Some(program.into());
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Chooses what fatal conditions do. Defaults to exiting the process.
    pub fn escalation(mut self, escalation: Escalation) -> Self {
        self.log = std::mem::take(&mut self.log).escalation(escalation);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Options can be changed until [`Self::start`] resolves them.
    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn logger(&self) -> &Logger {
        &self.log
    }

    pub fn signals_mut(&mut self) -> &mut Dispatcher {
        &mut self.signals
    }

    /// Replaces the handler for `signal`.
    pub fn on_signal<F>(&mut self, signal: Signal, f: F) -> Result<()>
    where
        F: Fn(&mut Daemon, Signal) + Send + Sync + 'static,
    {
        self.signals.set(signal, Handler::custom(f))
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The daemon's own pid once it has forked.
    pub fn pid(&self) -> Option<Pid> {
        self.process.pid
    }

    /// Validates the configuration and moves the process into the
    /// background.
    ///
    /// Only the detached child returns from a successful call; the original
    /// process exits once it has forked.
    pub fn start(&mut self) -> Result<()> {
        self.state = State::Initializing;

        self.options.init(true)?;
        self.log.configure(&self.options);
        if self.options.get_bool("logPanics").unwrap_or(true) {
            self.log.reroute_panics();
        }

        self.check_prerequisites().map_err(|err| self.abort(err))?;

        self.options.init(false).map_err(|err| self.abort(err))?;
        self.log.configure(&self.options);

        let app_name = self.options.get_str("appName").unwrap_or_default();
        let pid_path = self
            .pid_path()
            .ok_or_else(|| self.abort(Error::Prerequisite("no pid file location".into())))?;
        pidfile::validate_location(&pid_path, &app_name).map_err(|err| self.abort(err))?;

        if let Some(pid) = self.running_pid() {
            return Err(self.abort(Error::AlreadyRunning { pid: pid.as_raw() }));
        }

        self.signals.install().map_err(|err| self.abort(err))?;

        self.state = State::Forking;
        let pid = fork::detach(&self.log).map_err(|err| self.abort(err))?;
        self.process = Process {
            pid: Some(pid),
            is_child: true,
            is_dying: false,
        };

        if let Err(err) = pidfile::write(&pid_path, pid) {
            self.log.error(err.to_string());
            return Err(err);
        }

        self.state = State::AdjustingIdentity;
        self.adjust_identity(&pid_path)?;

        let workdir = self
            .options
            .get_path("appWorkDir")
            .unwrap_or(Cow::Borrowed(Path::new("/")));
        env::set_current_dir(&workdir)
            .map_err(|err| self.abort(Error::io(&*workdir, err)))?;

        if let Some(umask) = self.options.get_number("appUmask") {
            stat::umask(Mode::from_bits_truncate(umask as mode_t));
        }

        fs::detach_stdio().map_err(|err| self.abort(err))?;
        self.log.set_echo(false);

        self.state = State::Running;
        self.log.info(format!("running in the background as pid {pid}"));

        Ok(())
    }

    /// Removes the pid file and ends the process.
    ///
    /// Calling this while already dying does nothing, as does calling it
    /// before the process is in the background.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown(false)
    }

    /// Like [`Self::stop`], but first launches a fresh copy of the program
    /// with the original arguments.
    pub fn restart(&mut self) -> Result<()> {
        self.shutdown(true)
    }

    fn shutdown(&mut self, restart: bool) -> Result<()> {
        if self.process.is_dying {
            return Ok(());
        }

        if !self.is_in_background() {
            self.log.info("not running in the background; nothing to stop");
            return Ok(());
        }

        self.process.is_dying = true;
        self.state = State::Dying;
        self.log
            .notice(if restart { "restarting" } else { "stopping" });

        let mut result = match self.pid_path() {
            Some(path) => pidfile::remove(path),
            None => Ok(()),
        };
        if let Err(err) = &result {
            self.log.error(err.to_string());
        }

        if restart && let Err(err) = self.respawn() {
            self.log.error(format!("restart failed: {err}"));
            result = result.and(Err(err));
        }

        self.state = State::Terminated;

        match self.log.get_escalation() {
            Escalation::Exit => exit(0),
            Escalation::Return => result,
        }
    }

    fn respawn(&self) -> Result<()> {
        let program = self.program.as_deref().ok_or_else(|| {
            Error::Prerequisite("the running executable cannot be located".into())
        })?;

        Command::new(program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::io(program, err))?;

        Ok(())
    }

    /// Whether the pid file names a live process.
    ///
    /// A pid file naming a dead process is removed.
    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    fn running_pid(&self) -> Option<Pid> {
        let path = self.pid_path()?;

        match pidfile::read(&path) {
            Ok(Some(pid)) if pidfile::is_alive(pid) => Some(pid),
            Ok(Some(pid)) => {
                self.log.warning(format!(
                    "removing orphaned pid file '{}' (pid {pid})",
                    path.display()
                ));
                if let Err(err) = pidfile::remove(&path) {
                    self.log.error(err.to_string());
                }
                None
            }
            Ok(None) => None,
            Err(err) => {
                self.log.error(err.to_string());
                None
            }
        }
    }

    pub fn is_dying(&self) -> bool {
        self.process.is_dying
    }

    /// Whether this is the detached child and its pid file names a live
    /// process. Leaves the pid file alone.
    pub fn is_in_background(&self) -> bool {
        self.process.is_child
            && self
                .pid_path()
                .and_then(|path| pidfile::read(path).ok().flatten())
                .is_some_and(pidfile::is_alive)
    }

    /// Sleeps, then handles any signals that arrived.
    pub fn iterate(&mut self, duration: Duration) -> Result<()> {
        thread::sleep(duration);
        self.dispatch_pending()
    }

    pub fn dispatch_pending(&mut self) -> Result<()> {
        for signal in self.signals.pending() {
            self.dispatch(signal)?;
        }

        Ok(())
    }

    /// Runs the handler table entry for `signal`.
    pub fn dispatch(&mut self, signal: Signal) -> Result<()> {
        self.log.debug(format!("received {signal}"));

        match self.signals.handler(signal) {
            Handler::Default => self.default_action(signal),
            Handler::Ignore => Ok(()),
            Handler::Custom(f) => {
                f(self, signal);
                Ok(())
            }
        }
    }

    fn default_action(&mut self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Term => {
                if self.is_in_background() {
                    return self.stop();
                }

                self.log.notice("terminated while in the foreground");
                match self.log.get_escalation() {
                    Escalation::Exit => exit(0),
                    Escalation::Return => {
                        self.process.is_dying = true;
                        self.state = State::Dying;
                    }
                }
            }
            Signal::Hup => self.log.info("restart requested"),
            Signal::Chld => {
                let reaped = signal::reap_children();
                if reaped > 0 {
                    self.log.debug(format!("reaped {reaped} children"));
                }
            }
            _ => (),
        }

        Ok(())
    }

    /// Forges the autostart script for this host and installs it.
    pub fn write_autorun(&self, overwrite: bool) -> Result<PathBuf> {
        let path = Driver::detect().write_autorun(&self.options, overwrite)?;
        self.log
            .info(format!("autostart script written to '{}'", path.display()));
        Ok(path)
    }

    fn pid_path(&self) -> Option<PathBuf> {
        self.options.get_path("appPidLocation").map(Cow::into_owned)
    }

    fn check_prerequisites(&self) -> Result<()> {
        if self.process.is_child {
            return Err(Error::Prerequisite(
                "already running in the background".into(),
            ));
        }

        #[cfg(target_os = "linux")]
        {
            let threads = std::fs::read_dir("/proc/self/task")
                .map(|tasks| tasks.count())
                .unwrap_or(1);
            if threads > 1 {
                return Err(Error::Prerequisite(format!(
                    "the process must be single-threaded to fork, found {threads} threads"
                )));
            }
        }

        Ok(())
    }

    /// Switches to `appRunAsUID`/`appRunAsGID` if they differ from the
    /// current identity.
    fn adjust_identity(&self, pid_path: &Path) -> Result<()> {
        let die = self
            .options
            .get_bool("appDieOnIdentityCrisis")
            .unwrap_or(true);

        match self.change_identity(pid_path) {
            Ok(()) => Ok(()),
            Err(err) if die => Err(self.abort(err)),
            Err(err) => {
                self.log.critical(err.to_string());
                Ok(())
            }
        }
    }

    fn change_identity(&self, pid_path: &Path) -> Result<()> {
        let user = match self.options.get("appRunAsUID") {
            Some(value) => User::try_from(&*value)?,
            None => unistd::getuid().into(),
        };
        let group = match self.options.get("appRunAsGID") {
            Some(value) => Group::try_from(&*value)?,
            None => unistd::getgid().into(),
        };

        let target = Identity::resolve(&user, &group)?;
        if target == Identity::current() {
            return Ok(());
        }

        // The files stay removable after privileges are gone.
        let owned = [
            pid_path.parent(),
            Some(pid_path),
            self.log.log_file().filter(|path| path.exists()),
        ];
        for path in owned.into_iter().flatten() {
            target.chown(path)?;
        }

        target.assume()?;
        self.log.info(format!(
            "now running as {user} and {group}"
        ));

        Ok(())
    }

    /// Logs `err` as an emergency and hands it back for propagation.
    ///
    /// Only returns when the logger escalates by returning.
    #[track_caller]
    fn abort(&self, err: Error) -> Error {
        let _ = self.log.log(Level::Emergency, err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{fs::read_to_string, sync::mpsc};

    struct Fixture {
        dir: tempfile::TempDir,
        daemon: Daemon,
    }

    impl Fixture {
        fn pid_path(&self) -> PathBuf {
            self.dir.path().join("svc/svc.pid")
        }

        fn log(&self) -> String {
            read_to_string(self.dir.path().join("svc.log")).unwrap_or_default()
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let mut options = Options::new();
        options
            .set_all([
                ("appName", crate::Value::from("svc")),
                ("logPanics", false.into()),
                ("logLocation", dir.path().join("svc.log").as_path().into()),
            ])
            .unwrap();
        // Temporary directories may contain uppercase letters, which
        // `unix_filepath` rejects; the value is stored regardless.
        let _ = options.set("appPidLocation", dir.path().join("svc/svc.pid").as_path());

        let daemon = Daemon::new(options).escalation(Escalation::Return);

        Fixture { dir, daemon }
    }

    fn into_background(daemon: &mut Daemon) {
        daemon.process = Process {
            pid: Some(unistd::getpid()),
            is_child: true,
            is_dying: false,
        };
        daemon.state = State::Running;
    }

    #[test]
    fn initial_state() {
        let Fixture { daemon, dir: _dir } = fixture();

        assert_eq!(daemon.state(), State::Unconfigured);
        assert_eq!(daemon.pid(), None);
        assert!(!daemon.is_dying());
        assert!(!daemon.is_running());
        assert!(!daemon.is_in_background());
    }

    #[test]
    fn running_with_own_pid() {
        let fixture = fixture();
        pidfile::write(fixture.pid_path(), unistd::getpid()).unwrap();

        assert!(fixture.daemon.is_running());
        assert!(fixture.pid_path().exists());
    }

    #[test]
    fn stale_pid_file_is_removed() {
        let fixture = fixture();
        pidfile::write(fixture.pid_path(), Pid::from_raw(i32::MAX)).unwrap();

        assert!(!fixture.daemon.is_running());
        assert!(!fixture.pid_path().exists());
        assert!(fixture.log().contains("removing orphaned pid file"));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut fixture = fixture();
        pidfile::write(fixture.pid_path(), unistd::getpid()).unwrap();
        into_background(&mut fixture.daemon);

        fixture.daemon.stop().unwrap();

        assert!(!fixture.pid_path().exists());
        assert!(fixture.daemon.is_dying());
        assert_eq!(fixture.daemon.state(), State::Terminated);

        // A second stop must not touch the pid file again.
        pidfile::write(fixture.pid_path(), unistd::getpid()).unwrap();
        fixture.daemon.stop().unwrap();

        assert!(fixture.pid_path().exists());
    }

    #[test]
    fn stop_in_foreground_declines() {
        let mut fixture = fixture();
        pidfile::write(fixture.pid_path(), unistd::getpid()).unwrap();

        fixture.daemon.stop().unwrap();

        assert!(fixture.pid_path().exists());
        assert!(!fixture.daemon.is_dying());
        assert!(fixture.log().contains("nothing to stop"));
    }

    #[test]
    fn custom_terminate_handler() {
        let mut fixture = fixture();
        fixture
            .daemon
            .on_signal(Signal::Term, |daemon, signal| {
                daemon.logger().notice(format!("custom handler got {signal}"));
            })
            .unwrap();

        fixture.daemon.dispatch(Signal::Term).unwrap();

        assert!(fixture.log().contains("custom handler got SIGTERM"));
        assert!(!fixture.daemon.is_dying());
        assert_eq!(fixture.daemon.state(), State::Unconfigured);
    }

    #[test]
    fn terminate_in_foreground() {
        let mut fixture = fixture();

        fixture.daemon.dispatch(Signal::Term).unwrap();

        assert!(fixture.daemon.is_dying());
        assert_eq!(fixture.daemon.state(), State::Dying);
    }

    #[test]
    fn terminate_in_background_stops() {
        let mut fixture = fixture();
        pidfile::write(fixture.pid_path(), unistd::getpid()).unwrap();
        into_background(&mut fixture.daemon);

        fixture.daemon.dispatch(Signal::Term).unwrap();

        assert!(fixture.daemon.is_dying());
        assert!(!fixture.pid_path().exists());
    }

    #[test]
    fn hangup_only_logs() {
        let mut fixture = fixture();

        fixture.daemon.dispatch(Signal::Hup).unwrap();

        assert!(fixture.log().contains("restart requested"));
        assert!(!fixture.daemon.is_dying());
    }

    #[test]
    fn ignored_signal() {
        let mut fixture = fixture();
        fixture
            .daemon
            .signals_mut()
            .set(Signal::Term, Handler::Ignore)
            .unwrap();

        fixture.daemon.dispatch(Signal::Term).unwrap();

        assert!(!fixture.daemon.is_dying());
    }

    #[test]
    fn start_fails_without_configuration() {
        let Fixture { dir, mut daemon } = fixture();

        let err = daemon.start().unwrap_err();

        // Test harness threads trip the single-thread check before the
        // missing options are noticed.
        assert!(matches!(err, Error::Prerequisite(_) | Error::Options(_)));
        assert_eq!(daemon.pid(), None);
        assert!(!dir.path().join("svc/svc.pid").exists());
        assert!(read_to_string(dir.path().join("svc.log"))
            .unwrap()
            .contains("emergency"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn threads_block_forking() {
        let Fixture { daemon, dir: _dir } = fixture();
        let (tx, rx) = mpsc::channel::<()>();
        let worker = thread::spawn(move || rx.recv());

        let result = daemon.check_prerequisites();

        tx.send(()).unwrap();
        worker.join().unwrap().unwrap();
        assert!(matches!(result, Err(Error::Prerequisite(m)) if m.contains("threads")));
    }

    #[test]
    fn background_child_cannot_start_again() {
        let mut fixture = fixture();
        into_background(&mut fixture.daemon);

        assert!(matches!(
            fixture.daemon.check_prerequisites(),
            Err(Error::Prerequisite(m)) if m.contains("already")
        ));
    }

    #[test]
    fn restart_relaunches_and_dies() {
        let Fixture { dir, daemon } = fixture();
        let marker = dir.path().join("marker");
        let mut daemon = daemon.relaunch("touch", [&marker]);
        let pid_path = dir.path().join("svc/svc.pid");
        pidfile::write(&pid_path, unistd::getpid()).unwrap();
        into_background(&mut daemon);

        daemon.restart().unwrap();

        assert!(!pid_path.exists());
        assert!(daemon.is_dying());
        assert_eq!(daemon.state(), State::Terminated);

        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(marker.exists());
        signal::reap_children();
    }

    #[test]
    fn failed_relaunch_still_stops() {
        let Fixture { dir, daemon } = fixture();
        let mut daemon = daemon.relaunch(dir.path().join("missing"), Vec::<OsString>::new());
        let pid_path = dir.path().join("svc/svc.pid");
        pidfile::write(&pid_path, unistd::getpid()).unwrap();
        into_background(&mut daemon);

        assert!(matches!(daemon.restart(), Err(Error::Io { .. })));
        assert!(!pid_path.exists());
        assert!(daemon.is_dying());
        assert!(read_to_string(dir.path().join("svc.log"))
            .unwrap()
            .contains("restart failed"));
    }

    #[test]
    fn background_query_keeps_stale_pid_file() {
        let mut fixture = fixture();
        pidfile::write(fixture.pid_path(), Pid::from_raw(i32::MAX)).unwrap();
        into_background(&mut fixture.daemon);

        assert!(!fixture.daemon.is_in_background());
        assert!(fixture.pid_path().exists());
    }

    #[test]
    fn identity_unchanged_is_noop() {
        let Fixture { dir, mut daemon } = fixture();
        let options = daemon.options_mut();
        let _ = options.set("appRunAsUID", unistd::getuid().as_raw());
        let _ = options.set("appRunAsGID", unistd::getgid().as_raw());

        assert!(daemon.adjust_identity(&dir.path().join("svc/svc.pid")).is_ok());
        assert!(!dir.path().join("svc").exists());
    }
}
