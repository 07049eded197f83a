use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, miette, IntoDiagnostic, Result};

use chisel::config::{parse_number, DriverConfig, MachineConfig};
use chisel::output::Output;
use chisel::{Breakpoint, Emulator, Frame, Message, Program, Reason, RunState, StateChange};

/// Chisel is a CHIP-8 virtual machine and assembler toolchain.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.c8s` or `.ch8` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run assembly source or a raw binary headless, then print registers and screen
    Run {
        /// `.c8s`/`.asm` source or `.ch8` binary to run
        name: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Assemble source into a raw `.ch8` binary
    Compile {
        /// Source file to assemble
        name: PathBuf,
        /// Destination of the binary
        dest: Option<PathBuf>,
        /// Address the program will be loaded at
        #[arg(long, value_parser = parse_address)]
        origin: Option<u16>,
    },
    /// Check a source file without running or writing a binary
    Check {
        /// File to check
        name: PathBuf,
        /// Address the program will be loaded at
        #[arg(long, value_parser = parse_address)]
        origin: Option<u16>,
    },
}

#[derive(clap::Args, Default)]
struct RunOptions {
    /// Throttle between 0.0 (slowest) and 1.0 (fastest)
    #[arg(short, long, default_value_t = 1.0)]
    speed: f32,
    /// Machine shape, e.g. `memory=4096,width=64,height=32,load=0x200`
    #[arg(long)]
    machine: Option<MachineConfig>,
    /// Stop at a label or address; may be repeated
    #[arg(short = 'b', long = "break")]
    breakpoints: Vec<String>,
    /// Stop after this many milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
    /// Load address, defaults to the machine's
    #[arg(long, value_parser = parse_address)]
    origin: Option<u16>,
}

fn parse_address(value: &str) -> std::result::Result<u16, String> {
    parse_number(value)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| format!("'{}' is not a 16-bit address", value))
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    chisel::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(chisel::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    match args.command {
        Some(Command::Run { name, options }) => run(&name, options),
        Some(Command::Compile { name, dest, origin }) => {
            file_message(Green, "Assembling", &name);
            let program = assemble_file(&name, origin.unwrap_or(chisel::DEFAULT_ORIGIN))?;
            let dest = match dest {
                Some(dest) => dest,
                None => name.with_extension("ch8"),
            };
            fs::write(&dest, &program.bytes).into_diagnostic()?;
            message(Green, "Finished", &format!("{} bytes", program.bytes.len()));
            file_message(Green, "Saved", &dest);
            Ok(())
        }
        Some(Command::Check { name, origin }) => {
            file_message(Green, "Checking", &name);
            let _ = assemble_file(&name, origin.unwrap_or(chisel::DEFAULT_ORIGIN))?;
            message(Green, "Success", "no errors found!");
            Ok(())
        }
        None => match args.path {
            Some(path) => run(&path, RunOptions::default_for_cli()),
            None => {
                println!("\n~ chisel v{VERSION} ~");
                println!("{SHORT_INFO}");
                Ok(())
            }
        },
    }
}

impl RunOptions {
    fn default_for_cli() -> Self {
        RunOptions {
            speed: 1.0,
            ..RunOptions::default()
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    if Output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn is_source(path: &Path) -> Result<bool> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("c8s" | "asm" | "s") => Ok(true),
        Some("ch8" | "c8" | "bin") => Ok(false),
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    }
}

/// Assemble a source file, printing every diagnostic.
fn assemble_file(name: &Path, origin: u16) -> Result<Program> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    let label = name.display().to_string();
    let print = |messages: &[Message]| {
        for message in messages {
            eprintln!("{:?}", message.report(&label, &src));
        }
    };
    match chisel::assemble(&src, origin) {
        Ok(program) => {
            print(&program.messages);
            Ok(program)
        }
        Err(messages) => {
            print(&messages);
            let count = messages.iter().filter(|m| m.is_error()).count();
            bail!("Assembly failed with {} error(s)", count)
        }
    }
}

fn run(name: &Path, options: RunOptions) -> Result<()> {
    Output::set_minimal(options.minimal);
    let machine = options.machine.unwrap_or_default();
    let origin = options.origin.unwrap_or(machine.load_address);

    let (bytes, program) = if is_source(name)? {
        file_message(MsgColor::Green, "Assembling", name);
        let program = assemble_file(name, origin)?;
        (program.bytes.clone(), Some(program))
    } else {
        (fs::read(name).into_diagnostic()?, None)
    };

    let breakpoints = options
        .breakpoints
        .iter()
        .map(|target| resolve_breakpoint(target, program.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let last_frame: Arc<Mutex<Option<Frame>>> = Arc::default();
    let sink_frame = Arc::clone(&last_frame);
    let config = DriverConfig {
        machine,
        speed: options.speed,
        timer_pulse: true,
    };
    let handle = Emulator::spawn_with_display(config, move |frame: &Frame| {
        if let Ok(mut last) = sink_frame.lock() {
            *last = Some(frame.clone());
        }
    })
    .into_diagnostic()?;

    let (changes, stopped) = mpsc::channel::<StateChange>();
    let changes = Mutex::new(changes);
    handle.on_state_change(move |change| {
        if let Ok(changes) = changes.lock() {
            let _ = changes.send(*change);
        }
    });

    handle.load(origin, bytes).into_diagnostic()?;
    handle
        .run_sync(move |machine| machine.set_pc(origin))
        .into_diagnostic()?;
    for breakpoint in breakpoints {
        handle.add_breakpoint(breakpoint, true).into_diagnostic()?;
    }
    message(MsgColor::Green, "Running", "emitted binary");
    handle.start().into_diagnostic()?;

    let deadline = options
        .timeout
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    let outcome = loop {
        let change = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                match stopped.recv_timeout(left) {
                    Ok(change) => change,
                    Err(RecvTimeoutError::Timeout) => {
                        handle.stop().into_diagnostic()?;
                        break None;
                    }
                    Err(RecvTimeoutError::Disconnected) => break None,
                }
            }
            None => match stopped.recv() {
                Ok(change) => change,
                Err(_) => break None,
            },
        };
        if change.state == RunState::Stopped {
            break Some(change);
        }
    };

    let state = handle
        .run_sync(|machine| machine.clone())
        .into_diagnostic()?;
    handle.terminate().into_diagnostic()?;
    handle.join();

    Output::Normal.print_registers(&state);
    let frame = last_frame
        .lock()
        .ok()
        .and_then(|mut frame| frame.take())
        .unwrap_or_else(|| state.screen().frame());
    Output::Normal.print_frame(&frame);

    match outcome {
        Some(StateChange {
            fault: Some(fault), ..
        }) => Err(miette!("Execution stopped: {}", fault)),
        Some(StateChange {
            reason: Reason::StoppedBreakpoint,
            pc,
            ..
        }) => {
            message(MsgColor::Cyan, "Breakpoint", &format!("0x{:03x}", pc));
            Ok(())
        }
        _ => {
            file_message(MsgColor::Green, "Completed", name);
            Ok(())
        }
    }
}

/// A label of the assembled program or a numeric address.
fn resolve_breakpoint(target: &str, program: Option<&Program>) -> Result<Breakpoint> {
    if let Some(address) = parse_number(target) {
        let address = u16::try_from(address)
            .map_err(|_| miette!("Breakpoint address '{}' does not fit 16 bits", target))?;
        return Ok(Breakpoint::persistent(address));
    }
    let Some(program) = program else {
        bail!("Cannot resolve label '{}' without assembly source", target);
    };
    let value = chisel::Identifier::new(target)
        .and_then(|name| program.symbols.get(&name).and_then(|symbol| symbol.value()));
    match value {
        Some(value) => Ok(Breakpoint::persistent(value as u16)),
        None => bail!("Unknown label '{}'", target),
    }
}

const SHORT_INFO: &str = r"
Welcome to chisel, a toolchain for assembling and running CHIP-8 programs.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
