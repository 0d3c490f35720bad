//! `gcode-canon`: thin CLI wrapper around [`gcode_canon`]'s interpreter core.
//!
//! Reads a program from a file (or stdin if none is given), drives it
//! through [`gcode_canon::GCodeState::update`] one block at a time against
//! the default in-memory input collaborator and a trace machine, and exits
//! non-zero on any core error or machine fault.

use clap::Parser;
use gcode_canon::input::{InputSource, StackInput};
use gcode_canon::machine::TraceMachine;
use gcode_canon::params::ParameterStore;
use gcode_canon::params_file::{JsonFileStore, ParameterPersistence};
use gcode_canon::state::GCodeState;
use std::io::Read as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Canonical G-code interpreter: translate a program into a trace of
/// machine motion commands.
#[derive(Parser, Debug)]
#[command(name = "gcode-canon", version, about)]
struct Args {
    /// G-code program to interpret. Reads stdin if omitted.
    input: Option<PathBuf>,

    /// Parameter file (WCS origins, tool table, ...), loaded at startup and
    /// saved after every commit.
    #[arg(long, default_value = "gcode-canon.params.json")]
    params: PathBuf,

    /// Log verbosity; overridden by `RUST_LOG` if set.
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    /// Directory to also write daily-rotating log files into, in addition
    /// to stderr. Off by default.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = init_logging(&args.verbosity, args.log_dir.as_deref());

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "gcode-canon terminated with an error");
            ExitCode::FAILURE
        }
    }
}

/// Sets up stderr logging plus, when `log_dir` is given, a daily-rotating
/// file appender. The returned guard must be kept alive for the process's
/// lifetime or the file writer's background thread is torn down early and
/// buffered lines are lost.
fn init_logging(
    default_directive: &str,
    log_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive))
    };

    match log_dir {
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
            None
        }
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "gcode-canon.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Some(guard)
        }
    }
}

fn run(args: &Args) -> Result<(), gcode_canon::AppError> {
    let text = read_program(args.input.as_deref())?;

    let persistence = JsonFileStore::new(&args.params);
    let loaded = persistence.load()?;
    let mut state = GCodeState::new().with_parameters(ParameterStore::from_committed(loaded));

    let mut input = StackInput::new(&text);
    let mut machine = TraceMachine::new();
    let mut buf = String::new();

    while state.still_running && input.fetch_line(&mut buf) {
        state.update(&buf, &mut input, &mut machine)?;
    }

    persistence.save(&state.params.persistent_snapshot().into_iter().collect::<Vec<_>>())?;
    Ok(())
}

fn read_program(path: Option<&std::path::Path>) -> Result<String, gcode_canon::AppError> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| gcode_canon::AppError::InputIo(e.to_string())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| gcode_canon::AppError::InputIo(e.to_string()))?;
            Ok(text)
        }
    }
}
