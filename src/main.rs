//! Dual-Mode CPU Emulator - CLI Entry Point
//!
//! Commands:
//! - `dualmode-emu run <program> <timer>` - Run a program until it ends
//! - `dualmode-emu debug <program> <timer>` - Interactive debugger
//! - `dualmode-emu disasm <program>` - Disassemble a program
//! - `dualmode-emu memory <program>` - Serve memory over stdin/stdout (internal)

use clap::{Args, Parser, Subcommand, ValueEnum};
use dualmode::cpu::{Cpu, CpuError, Executed, MemoryPort, Snapshot};
use dualmode::link::{spawn_service, ChannelPort, MemoryService, ServiceError};
use dualmode::{disassemble, load_program, Config};
use std::error::Error;
use std::io::{self, IsTerminal, Stdout, Write};
use std::path::PathBuf;
use std::process::exit;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "dualmode-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "A user/kernel mode CPU emulator with timer interrupts")]
struct Cli {
    /// Increase the level of verbosity. Can be used multiple times.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use JSON output for log messages
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "dualmode=debug,dualmode_emu=debug,info",
            2 => "dualmode=trace,dualmode_emu=trace,info",
            3..=u8::MAX => "trace",
        }
    }

    fn filter_layer(&self) -> EnvFilter {
        // RUST_LOG wins over -v
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_filter()))
    }

    /// Logs go to stderr so program output on stdout stays clean.
    fn init_logging(&self) {
        let registry = tracing_subscriber::registry().with(self.filter_layer());

        if self.json {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stderr);
            registry.with(json_layer).init();
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false)
                .with_ansi(io::stderr().is_terminal())
                .with_writer(io::stderr);
            registry.with(fmt_layer).init();
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it ends
    Run(RunArgs),
    /// Interactive debugger
    Debug {
        /// Path to the program file
        program: PathBuf,
        /// Instructions between timer interrupts
        #[arg(allow_negative_numbers = true)]
        timer: i64,
        /// Seed for the Get instruction
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Disassemble a program to readable text
    Disasm {
        /// Path to the program file
        program: PathBuf,
    },
    /// Serve a program's memory over stdin/stdout
    #[command(hide = true)]
    Memory {
        /// Path to the program file
        program: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the program file
    program: PathBuf,
    /// Instructions between timer interrupts
    #[arg(allow_negative_numbers = true)]
    timer: i64,
    /// Seed for the Get instruction (default: from the clock)
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many instructions
    #[arg(short, long)]
    max_cycles: Option<u64>,
    /// Print every executed instruction to stderr
    #[arg(short, long)]
    trace: bool,
    /// Where the memory service runs
    #[arg(short, long, value_enum, default_value_t = PortKind::Local)]
    port: PortKind,
    /// Print the final CPU state as JSON
    #[arg(long)]
    report: bool,
}

/// How the CPU reaches memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PortKind {
    /// Memory inside the CPU process
    Local,
    /// Memory service on a separate thread
    Thread,
    /// Memory service in a child process, over pipes
    Process,
}

fn main() {
    let cli = Cli::parse();
    cli.init_logging();

    let res = match cli.command {
        Commands::Run(args) => run_program(&args),
        Commands::Debug { program, timer, seed } => debug_program(program, timer, seed),
        Commands::Disasm { program } => disassemble_file(program),
        Commands::Memory { program } => serve_memory(program),
    };

    if let Err(e) = res {
        error!("{}", e);
        exit(1);
    }
}

fn build_config(
    timer: i64,
    seed: Option<u64>,
    max_cycles: Option<u64>,
) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::new(timer)?;
    if let Some(seed) = seed {
        config = config.with_seed(seed);
    }
    if let Some(max_cycles) = max_cycles {
        config = config.with_max_cycles(max_cycles);
    }
    config.validate()?;
    Ok(config)
}

fn run_program(args: &RunArgs) -> CliResult {
    let config = build_config(args.timer, args.seed, args.max_cycles)?;
    info!(program = %args.program.display(), port = ?args.port, "running");

    match args.port {
        PortKind::Local => {
            let program = load_program(&args.program)?;
            let mut cpu = Cpu::new(program.memory, io::stdout(), &config);
            let result = drive(&mut cpu, &config, args.trace);
            let snapshot = cpu.snapshot();
            let (_, mut out) = cpu.into_parts();
            out.flush()?;
            finish(snapshot, result.map_err(Into::into), args.report)
        }
        PortKind::Thread => {
            let program = load_program(&args.program)?;
            let port = ChannelPort::spawn(MemoryService::from(program));
            let mut cpu = Cpu::new(port, io::stdout(), &config);
            let result = drive(&mut cpu, &config, args.trace);
            let snapshot = cpu.snapshot();
            let (port, mut out) = cpu.into_parts();
            out.flush()?;
            let outcome = join_outcome(result, port.join());
            finish(snapshot, outcome, args.report)
        }
        PortKind::Process => {
            // Fail on a bad program here rather than in the child.
            load_program(&args.program)?;
            let exe = std::env::current_exe()?;
            let (port, mut child) = spawn_service(&exe, &args.program)?;
            let mut cpu = Cpu::new(port, io::stdout(), &config);
            let result = drive(&mut cpu, &config, args.trace);
            let snapshot = cpu.snapshot();
            let (port, mut out) = cpu.into_parts();
            out.flush()?;
            // Closing our end of the pipes lets the child see EOF.
            drop(port);
            let status = child.wait()?;
            debug!(%status, "memory process exited");
            finish(snapshot, result.map_err(Into::into), args.report)
        }
    }
}

/// Step the CPU until it stops or hits the cycle limit.
fn drive<M: MemoryPort>(
    cpu: &mut Cpu<M, Stdout>,
    config: &Config,
    trace: bool,
) -> Result<(), CpuError> {
    let limit = config.max_cycles.unwrap_or(u64::MAX);

    while cpu.is_running() && cpu.cycles < limit {
        let executed = cpu.step()?;
        if trace {
            eprintln!("{}", trace_line(&executed, cpu));
        }
    }

    if cpu.is_running() {
        warn!(limit, "cycle limit reached, stopping");
        if let Err(e) = cpu.terminate() {
            debug!(error = %e, "could not signal memory service");
        }
    }

    Ok(())
}

fn trace_line<M: MemoryPort>(executed: &Executed, cpu: &Cpu<M, Stdout>) -> String {
    let text = match executed.operand {
        Some(operand) => format!("{} {}", executed.opcode, operand),
        None => executed.opcode.to_string(),
    };
    let interrupt = match executed.interrupt {
        Some(cause) => format!("  -> {:?} interrupt", cause),
        None => String::new(),
    };
    format!("{:04}: {:<24} {} {}{}", executed.pc, text, cpu.regs, cpu.mode, interrupt)
}

/// A CPU fault outranks whatever the service thread saw as it went down.
fn join_outcome(
    result: Result<(), CpuError>,
    joined: Result<MemoryService, ServiceError>,
) -> CliResult {
    match (result, joined) {
        (Err(e), Err(service_error)) => {
            debug!(error = %service_error, "memory thread failed after CPU fault");
            Err(e.into())
        }
        (Err(e), Ok(_)) => Err(e.into()),
        (Ok(()), Err(service_error)) => Err(service_error.into()),
        (Ok(()), Ok(service)) => {
            debug!(served = service.served(), "memory thread joined");
            Ok(())
        }
    }
}

fn finish(snapshot: Snapshot, result: CliResult, report: bool) -> CliResult {
    info!(
        cycles = snapshot.cycles,
        interrupts = snapshot.interrupts,
        state = ?snapshot.state,
        "finished"
    );

    if report {
        println!();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    result
}

#[cfg(feature = "tui")]
fn debug_program(path: PathBuf, timer: i64, seed: Option<u64>) -> CliResult {
    use dualmode::run_debugger;

    let config = build_config(timer, seed, None)?;
    let program = load_program(&path)?;
    if program.is_empty() {
        return Err("no instructions to execute".into());
    }

    run_debugger(program, config)?;
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: PathBuf, _timer: i64, _seed: Option<u64>) -> CliResult {
    Err("this build has no debugger; rebuild with the `tui` feature".into())
}

fn disassemble_file(path: PathBuf) -> CliResult {
    let program = load_program(&path)?;
    println!("{}", disassemble(&program));
    Ok(())
}

fn serve_memory(path: PathBuf) -> CliResult {
    let program = load_program(&path)?;
    let mut service = MemoryService::from(program);

    let stdin = io::stdin();
    let stdout = io::stdout();
    service.serve(stdin.lock(), stdout.lock())?;
    Ok(())
}
