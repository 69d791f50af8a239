use std::env;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tether_core::events::{signal_name, ProcessEventReceiver};
use tether_core::{event_channel, Address, LaunchFlags, LaunchInfo, MonitorConfig, ProcessEvent, ProcessId};
use tether_core::{ProcessMonitor, SignalOrigin, TetherError, ThreadId};
use tether_utils::{default_log_file, info, init_logging_with, warn, LogConfig, LogLevel, LoggingError, WorkerGuard};

/// How often the event loop checks for Ctrl-C
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Large enough for any general-purpose register set
const GPR_BUFFER: usize = 4096;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Launch or attach to a process under ptrace and report what it does.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Launch or attach to a process under ptrace and report what it does", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Also log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log to a dated file under ~/.tether
    #[arg(long, global = true, default_value_t = false)]
    log_to_file: bool,

    /// Report PTRACE_EVENT_EXIT stops
    #[arg(long, global = true, default_value_t = false)]
    trace_exit: bool,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Attach to a running process, print its state and detach again
    Attach
    {
        /// Process ID (PID) to attach to
        pid: u32,
        /// Memory address to dump (hex format: 0x1000 or decimal)
        #[arg(long, value_parser = parse_address)]
        memory: Option<u64>,
        /// Number of bytes to dump
        #[arg(short, long, default_value_t = 64)]
        length: usize,
    },
    /// Launch a new process under tracer control and report its events
    Launch
    {
        /// Path to the executable to launch
        program: PathBuf,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Read the program's stdin from this file
        #[arg(long)]
        stdin: Option<PathBuf>,
        /// Write the program's stdout to this file
        #[arg(long)]
        stdout: Option<PathBuf>,
        /// Write the program's stderr to this file
        #[arg(long)]
        stderr: Option<PathBuf>,
        /// Working directory of the program
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Set an environment variable (KEY=VALUE); the rest is inherited
        #[arg(long = "env", value_parser = parse_env_var)]
        env: Vec<(String, String)>,
        /// Run with address-space randomization disabled
        #[arg(long, default_value_t = false)]
        no_aslr: bool,
    },
}

fn main()
{
    let cli = Cli::parse();

    let guard = match init_logging_for(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let code = match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // process::exit skips destructors; flush the log file first
    drop(guard);
    process::exit(code);
}

fn init_logging_for(cli: &Cli) -> Result<Option<WorkerGuard>, LoggingError>
{
    let mut config = LogConfig::from_env();
    if let Some(level) = cli.log_level {
        config = config.with_level(level);
    }
    if let Some(file) = &cli.log_file {
        config = config.with_file(file);
    } else if cli.log_to_file {
        config = config.with_file(default_log_file()?);
    }
    init_logging_with(&config)
}

/// Run the selected command, returning the exit code for this process
fn run_command(cli: Cli) -> CliResult<i32>
{
    let mut config = MonitorConfig::from_env();
    if cli.trace_exit {
        config = config.trace_exit(true);
    }

    match cli.command {
        Commands::Attach { pid, memory, length } => attach(ProcessId(pid), memory.map(Address::new), length, config),
        Commands::Launch {
            program,
            args,
            stdin,
            stdout,
            stderr,
            cwd,
            env: overrides,
            no_aslr,
        } => {
            let mut info = LaunchInfo::new(&program).args(args).flags(LaunchFlags {
                disable_aslr: no_aslr,
            });
            if !overrides.is_empty() {
                for (key, value) in env::vars_os() {
                    info = info.env(key, value);
                }
                for (key, value) in overrides {
                    info = info.env(key, value);
                }
            }
            if let Some(path) = stdin {
                info = info.stdin(path);
            }
            if let Some(path) = stdout {
                info = info.stdout(path);
            }
            if let Some(path) = stderr {
                info = info.stderr(path);
            }
            if let Some(dir) = cwd {
                info = info.working_dir(dir);
            }
            launch(info, config)
        }
    }
}

fn launch(info: LaunchInfo, config: MonitorConfig) -> CliResult<i32>
{
    let (observer, events) = event_channel();
    let monitor = ProcessMonitor::launch(&observer, info.clone(), config)?;
    println!("Launched {} (PID: {})", info.program().display(), monitor.pid());
    if let Some(terminal) = monitor.terminal()? {
        pump_terminal(terminal);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let session = Session { monitor: &monitor };
    session.resume(monitor.pid().main_thread(), None);
    let code = session.run(&events, &interrupted);
    monitor.stop_monitor();
    Ok(code)
}

fn attach(pid: ProcessId, memory: Option<Address>, length: usize, config: MonitorConfig) -> CliResult<i32>
{
    let (observer, _events) = event_channel();
    let monitor = ProcessMonitor::attach(&observer, pid, config)?;
    println!("Attached to process {pid} ({} thread(s))", monitor.initial_threads().len());

    for &tid in monitor.initial_threads() {
        print_thread(&monitor, tid);
    }
    if let Some(addr) = memory {
        dump_memory(&monitor, addr, length);
    }

    for &tid in monitor.initial_threads() {
        if let Err(e) = monitor.detach(tid) {
            warn!("Could not detach thread {tid}: {e}");
        }
    }
    monitor.stop_monitor();
    println!("Detached from process {pid}");
    Ok(0)
}

fn print_thread(monitor: &ProcessMonitor, tid: ThreadId)
{
    let mut gpr = vec![0u8; GPR_BUFFER];
    let gpr_size = match monitor.read_gpr(tid, &mut gpr) {
        Ok(size) => format!("{size} bytes"),
        Err(e) => format!("unavailable ({e})"),
    };
    let thread_pointer = match monitor.read_thread_pointer(tid) {
        Ok(addr) => addr.to_string(),
        Err(e) => format!("unavailable ({e})"),
    };
    println!("  thread {tid}: general registers {gpr_size}, thread pointer {thread_pointer}");
}

fn dump_memory(monitor: &ProcessMonitor, addr: Address, length: usize)
{
    let mut buf = vec![0u8; length];
    let valid = match monitor.read_memory(addr, &mut buf) {
        Ok(n) => n,
        Err(TetherError::PartialTransfer { transferred, errno, .. }) => {
            println!("  (read stopped after {transferred} bytes: {errno})");
            transferred
        }
        Err(e) => {
            println!("  Could not read memory at {addr}: {e}");
            return;
        }
    };

    for (row, chunk) in buf[..valid].chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&byte| if byte.is_ascii_graphic() { byte as char } else { '.' })
            .collect();
        println!("  {}  {:<47}  {ascii}", addr + (row as u64) * 16, hex.join(" "));
    }
}

/// Copy the debuggee's terminal to our stdout, and our stdin to the terminal
fn pump_terminal(terminal: std::fs::File)
{
    let input = terminal.try_clone();
    thread::spawn(move || {
        let mut terminal = terminal;
        let mut buf = [0u8; 4096];
        let mut stdout = io::stdout();
        // EIO once the last slave descriptor is closed
        while let Ok(n @ 1..) = terminal.read(&mut buf) {
            if stdout.write_all(&buf[..n]).and_then(|()| stdout.flush()).is_err() {
                break;
            }
        }
    });

    if let Ok(mut input) = input {
        thread::spawn(move || {
            let _ = io::copy(&mut io::stdin().lock(), &mut input);
        });
    }
}

/// Event loop that keeps every thread running and reports what happens
struct Session<'a>
{
    monitor: &'a ProcessMonitor,
}

impl Session<'_>
{
    fn resume(&self, tid: ThreadId, signal: Option<i32>)
    {
        if let Err(e) = self.monitor.resume(tid, signal) {
            warn!("Could not resume thread {tid}: {e}");
        }
    }

    /// Run until the debuggee is gone, returning its exit code
    fn run(&self, events: &ProcessEventReceiver, interrupted: &AtomicBool) -> i32
    {
        loop {
            if interrupted.swap(false, Ordering::SeqCst) {
                info!("Interrupted, killing process {}", self.monitor.pid());
                if let Err(e) = self.monitor.kill() {
                    warn!("Could not kill process {}: {e}", self.monitor.pid());
                    return 130;
                }
            }

            let event = match events.recv_timeout(INTERRUPT_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return 1,
            };
            println!("[tether] {event}");

            if let Some(code) = self.handle(event) {
                return code;
            }
        }
    }

    fn handle(&self, event: ProcessEvent) -> Option<i32>
    {
        match event {
            ProcessEvent::Trap { tid, .. } | ProcessEvent::Exec { tid } | ProcessEvent::Exiting { tid, .. } => {
                self.resume(tid, None);
            }
            ProcessEvent::Signal { tid, signal, origin, .. } => {
                // Our own SIGSTOPs stay with us
                let forward = (origin != SignalOrigin::Tracer).then_some(signal);
                self.resume(tid, forward);
            }
            ProcessEvent::NewThread { parent, tid } => {
                self.resume(parent, None);
                match self.monitor.wait_for_initial_tid_stop(tid) {
                    Ok(()) => self.resume(tid, None),
                    Err(e) => warn!("Thread {tid} never stopped: {e}"),
                }
            }
            ProcessEvent::ThreadExited { .. } => {}
            ProcessEvent::Exited { code, .. } => return Some(code),
            ProcessEvent::Terminated { signal, .. } => {
                info!("Process terminated by {}", signal_name(signal));
                return Some(128 + signal);
            }
        }
        None
    }
}

/// Parse `0x`-prefixed hex or decimal
fn parse_address(s: &str) -> Result<u64, String>
{
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_env_var(s: &str) -> Result<(String, String), String>
{
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
