use clap::Parser;
use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};
use sysdaemon::{Daemon, Options, Signal};
use tracing_subscriber::EnvFilter;

/// Watches a log file and reports how many lines it has gained
///
/// Options are read from a TOML file whose keys are option names, for
/// example `appName = "logparser"`. The daemon writes its own log to
/// `logLocation` and its pid to `appPidLocation`.
#[derive(Debug, Parser)]
#[command(max_term_width = 80)]
struct Cli {
    /// Daemon configuration
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// The log file to watch
    #[arg(short, long, value_name = "FILE", default_value = "/var/log/syslog")]
    input: PathBuf,

    /// Seconds between checks
    #[arg(long, value_name = "SECONDS", default_value_t = 2)]
    interval: u64,

    /// Install an init script for this host and exit
    #[arg(long)]
    write_init: bool,

    /// Replace an existing init script
    #[arg(long, requires = "write_init")]
    overwrite: bool,

    /// Also write tracing output, filtered by RUST_LOG, to this file
    #[arg(long, value_name = "FILE")]
    trace: Option<PathBuf>,
}

fn count_lines(path: &Path) -> Option<usize> {
    fs::read_to_string(path).ok().map(|text| text.lines().count())
}

fn run(cli: Cli) -> sysdaemon::Result<()> {
    let mut options = Options::new();
    options.load_file(&cli.config)?;

    let mut daemon = Daemon::new(options);

    if cli.write_init {
        daemon.options_mut().init(false)?;
        let path = daemon.write_autorun(cli.overwrite)?;
        println!("{}", path.display());
        return Ok(());
    }

    daemon.on_signal(Signal::Hup, |daemon, _| {
        if let Err(err) = daemon.restart() {
            daemon.logger().error(format!("restart failed: {err}"));
        }
    })?;

    daemon.start()?;

    let interval = Duration::from_secs(cli.interval);
    let mut seen = count_lines(&cli.input).unwrap_or(0);

    while !daemon.is_dying() {
        match count_lines(&cli.input) {
            Some(lines) if lines > seen => {
                daemon
                    .logger()
                    .info(format!("{} new lines in '{}'", lines - seen, cli.input.display()));
                seen = lines;
            }
            Some(lines) => seen = lines,
            None => daemon
                .logger()
                .warning(format!("cannot read '{}'", cli.input.display())),
        }

        daemon.iterate(interval)?;
    }

    daemon.stop()
}

/// The daemon's logger already echoes to the console, so tracing output
/// goes to its own file.
fn trace_to(path: &Path) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(path) = &cli.trace
        && let Err(err) = trace_to(path)
    {
        eprintln!("'{}': {err}", path.display());
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
