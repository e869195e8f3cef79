//! T86 simulator command-line front end.
//!
//! Grounded in `t86-cli/main.cpp`: parse a `.t86` file, build a [`Config`]
//! from flags, and either run it straight through (forwarding console I/O
//! to the terminal) or start a debug server and wait for a native debugger
//! to connect over TCP (spec §6, "Command-line interface").

use std::fs;
use std::io::Write as _;
use std::net::TcpListener;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use t86::config::Config;
use t86::os::{run_with_stdio, RunOutcome};
use t86::parser::{parse, AsmParseError};
use t86::ExecutionError;
use t86_debug::protocol::{read_frame, write_frame, ProtocolError, Request, Response};
use t86_debug::server::DebugServer;

/// `t86 FILE [--debug] [...]`
#[derive(Parser, Debug)]
#[command(name = "t86", author, version, about = "Cycle-accurate T86 simulator and remote debugger")]
struct Cli {
    /// Path to a `.t86` assembly file.
    file: String,

    /// Wait for a debugger to attach over TCP instead of running to completion.
    #[arg(long)]
    debug: bool,

    /// TCP port the debug server listens on (only with `--debug`).
    #[arg(long, default_value_t = Config::default().debug_port)]
    port: u16,

    /// Number of logical general-purpose registers.
    #[arg(long = "register-cnt")]
    register_cnt: Option<usize>,

    /// Number of logical floating-point registers.
    #[arg(long = "float-register-cnt")]
    float_register_cnt: Option<usize>,

    /// RAM size, in 64-bit words.
    #[arg(long = "memory-size")]
    memory_size: Option<usize>,

    /// Number of ALUs available to the reservation station.
    #[arg(long = "alu-cnt")]
    alu_cnt: Option<usize>,

    /// Reservation-station capacity.
    #[arg(long = "reservation-station-entries")]
    reservation_station_entries: Option<usize>,
}

impl Cli {
    fn to_config(&self) -> Config {
        let defaults = Config::default();
        Config {
            register_count: self.register_cnt.unwrap_or(defaults.register_count),
            float_register_count: self.float_register_cnt.unwrap_or(defaults.float_register_count),
            alu_count: self.alu_cnt.unwrap_or(defaults.alu_count),
            reservation_station_entries: self.reservation_station_entries.unwrap_or(defaults.reservation_station_entries),
            ram_size: self.memory_size.unwrap_or(defaults.ram_size),
            debug_port: self.port,
            ..defaults
        }
    }
}

/// A failure that maps directly onto one of the documented exit codes
/// (spec §7, "CLI exit codes"): 1 for usage, 2 for assembly errors, 3 for I/O.
#[derive(Debug, Error)]
enum CliError {
    /// A flag combination clap itself rejected.
    #[error("{0}")]
    Usage(String),
    /// The input file failed to parse as T86 assembly.
    #[error("{0}")]
    Parse(#[from] AsmParseError),
    /// The file could not be read, or the debug server's socket failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The program violated a runtime invariant (e.g. RAM too small).
    #[error("{0}")]
    Execution(#[from] ExecutionError),
}

impl CliError {
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 1,
            Self::Parse(_) => 2,
            Self::Io(_) | Self::Execution(_) => 3,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("t86: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let source = fs::read_to_string(&cli.file)?;
    let program = parse(&source)?;
    let config = cli.to_config();

    if cli.debug {
        serve_debug_session(config, program, cli.port)
    } else {
        let mut cpu = t86::cpu::Cpu::new(config);
        match run_with_stdio(&mut cpu, program)? {
            RunOutcome::Halted => Ok(()),
            RunOutcome::Breakpoint => Ok(()),
            RunOutcome::Interrupt(code) => {
                eprintln!("t86: unhandled interrupt {code}");
                Err(CliError::Execution(ExecutionError::UnhandledInterrupt(code)))
            }
        }
    }
}

/// Listens on `port`, accepts exactly one debugger connection, and
/// services [`Request`] frames against a [`DebugServer`] until the client
/// disconnects (spec §4.10: one debugger at a time).
fn serve_debug_session(config: Config, program: t86::program::Program, port: u16) -> Result<(), CliError> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    tracing::info!(port, "debug server listening");

    let (mut stream, peer) = listener.accept()?;
    tracing::info!(%peer, "debugger attached");

    let mut server = DebugServer::new(t86::cpu::Cpu::new(config), program)?;

    loop {
        let request: Request = match read_frame(&stream) {
            Ok(request) => request,
            Err(ProtocolError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!("debugger disconnected");
                return Ok(());
            }
            Err(err) => return Err(CliError::Io(std::io::Error::other(err))),
        };

        let disconnect = matches!(request, Request::Disconnect);
        let response = server.handle(request);
        write_frame(&mut stream, &response)?;
        stream.flush()?;

        if disconnect {
            return Ok(());
        }
        if matches!(response, Response::Error(_)) {
            tracing::warn!(?response, "request failed");
        }
    }
}
