use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io::{self, stdin, stdout};
use std::path::PathBuf;

use clap::ArgAction::{Set, SetTrue};
use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use scp::{ScpConfig, ScpError, DEFAULT_INSTRUCTIONS_PER_SECOND};

mod console;
mod machine;
mod repl;

use repl::Session;

/// Simulator control program driving a small test bench machine
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Simulated instructions per second, used to convert delays
    /// given in microseconds into instruction counts.
    #[clap(action = Set, long, default_value_t = DEFAULT_INSTRUCTIONS_PER_SECOND)]
    ips: u32,

    /// Do not echo the commands run by breakpoint and expect
    /// actions.
    #[clap(action = SetTrue, short, long)]
    quiet: bool,

    /// Program to load before any commands are run.
    #[clap(action = Set, short, long)]
    program: Option<PathBuf>,

    /// File of commands to execute before reading commands from
    /// standard input.
    #[clap(action = Set)]
    script: Option<PathBuf>,
}

#[derive(Debug)]
enum Fail {
    /// We were not able to correctly initialise the simulator.
    InitialisationFailure(String),
    /// A command given on the command line failed.
    CommandFailed(ScpError),
    /// We could not read commands from standard input.
    Input(io::Error),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::InitialisationFailure(msg) => f.write_str(msg.as_str()),
            Fail::CommandFailed(e) => e.fmt(f),
            Fail::Input(e) => write!(f, "failed to read input: {e}"),
        }
    }
}

impl Error for Fail {}

fn run_simulator() -> Result<(), Fail> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.2.19/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("warn"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    if cli.ips == 0 {
        return Err(Fail::InitialisationFailure(
            "--ips must be greater than zero".to_string(),
        ));
    }
    let config = ScpConfig {
        instructions_per_second: cli.ips,
        ..ScpConfig::default()
    };
    event!(Level::INFO, "configuration: {:?}", config);

    let mut session = Session::new(config, cli.quiet, stdout());
    if let Some(program) = cli.program.as_deref() {
        session.load_program(program).map_err(Fail::CommandFailed)?;
    }
    if let Some(script) = cli.script.as_deref() {
        if let Err(e) = session.do_file(script) {
            session.report_error(&e);
        }
    }
    if session.exit_requested() {
        return Ok(());
    }
    let interactive = atty::is(atty::Stream::Stdin);
    session
        .interact(stdin().lock(), interactive)
        .map_err(Fail::Input)
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
