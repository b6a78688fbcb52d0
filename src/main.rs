use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};

use stressgen::config::StressConfig;
use stressgen::daemon::{self, DaemonError, Detached};
use stressgen::engine::heartbeat::MASTER_PORT_DEFAULT;
use stressgen::monitor::HTTP_BIND_DEFAULT;
use stressgen::shutdown::Shutdown;
use stressgen::singleton::{self, DaemonLock, Takeover};
use stressgen::units::{parse_seconds, parse_size};

#[derive(Parser)]
#[command(
    name = "stressgen",
    about = "Synthetic CPU and network load generator",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start generating load (replaces a running instance)
    Run(RunArgs),

    /// Stop the running instance
    Stop(StopArgs),

    /// Collect heartbeats and serve them over HTTP
    Monitor(MonitorArgs),
}

#[derive(Args)]
struct RunArgs {
    /// UDP load destinations, one sender each
    hosts: Vec<String>,

    /// Number of CPU churn threads
    #[arg(short = 'C', long = "cpu", value_name = "N")]
    cpu_threads: Option<usize>,

    /// Target throughput per sender in bytes/second (K, M, G suffixes)
    #[arg(short = 'N', long = "rate", value_name = "SIZE", value_parser = parse_size)]
    rate: Option<u64>,

    /// Send raw Ethernet frames instead of UDP (Linux, root)
    #[arg(short = 'E', long = "raw-frames")]
    raw_frames: bool,

    /// Active phase length (m, h suffixes)
    #[arg(short = 'A', long = "active", value_name = "DURATION", value_parser = parse_seconds)]
    active: Option<u64>,

    /// Sleep phase length (m, h suffixes)
    #[arg(short = 'S', long = "sleep", value_name = "DURATION", value_parser = parse_seconds)]
    sleep: Option<u64>,

    /// Alternate CPU and network load phases
    #[arg(short = 'I', long = "alternate", conflicts_with = "random")]
    alternate: bool,

    /// Offset network load by a random part of the active phase
    #[arg(short = 'R', long = "random")]
    random: bool,

    /// Send heartbeats to this monitoring host
    #[arg(short = 'M', long = "master", value_name = "HOST", conflicts_with = "broadcast")]
    master: Option<String>,

    /// Broadcast heartbeats
    #[arg(short = 'B', long = "broadcast")]
    broadcast: bool,

    /// Heartbeat destination port
    #[arg(long, value_name = "PORT")]
    master_port: Option<u16>,

    /// Load destination port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Payload bytes per packet when no rate is given
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    size: Option<u64>,

    /// Delay between packets in microseconds when no rate is given
    #[arg(long, value_name = "MICROS")]
    delay: Option<u64>,

    /// Heartbeat interval (m, h suffixes)
    #[arg(long, value_name = "DURATION", value_parser = parse_seconds)]
    heartbeat: Option<u64>,

    #[command(flatten)]
    common: CommonArgs,

    /// Stay attached to the terminal
    #[arg(long)]
    foreground: bool,
}

#[derive(Args)]
struct StopArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct MonitorArgs {
    /// UDP port heartbeats arrive on
    #[arg(long, default_value_t = MASTER_PORT_DEFAULT)]
    port: u16,

    /// HTTP bind address for the host table
    #[arg(long, default_value = HTTP_BIND_DEFAULT)]
    bind: SocketAddr,

    /// Path to a TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to a TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Singleton lock file
    #[arg(long, value_name = "FILE", env = "STRESSGEN_LOCK_FILE")]
    lock_file: Option<PathBuf>,
}

impl RunArgs {
    /// Layer the command-line flags over the loaded configuration.
    fn apply(self, config: &mut StressConfig) {
        if !self.hosts.is_empty() {
            config.net.hosts = self.hosts;
        }
        if let Some(threads) = self.cpu_threads {
            config.cpu.threads = threads;
        }
        if let Some(rate) = self.rate {
            config.net.target_rate = rate;
        }
        if self.raw_frames {
            config.net.raw_frames = true;
        }
        if let Some(active) = self.active {
            config.schedule.active_secs = active;
        }
        if let Some(sleep) = self.sleep {
            config.schedule.sleep_secs = sleep;
        }
        if self.alternate {
            config.schedule.desync = stressgen::config::Desync::Alternate;
        }
        if self.random {
            config.schedule.desync = stressgen::config::Desync::Random;
        }
        if let Some(master) = self.master {
            config.heartbeat.enabled = true;
            config.heartbeat.master = Some(master);
        }
        if self.broadcast {
            config.heartbeat.enabled = true;
            config.heartbeat.master = None;
        }
        if let Some(port) = self.master_port {
            config.heartbeat.port = port;
        }
        if let Some(port) = self.port {
            config.net.port = port;
        }
        if let Some(size) = self.size {
            config.net.message_size = usize::try_from(size).unwrap_or(usize::MAX);
        }
        if let Some(delay) = self.delay {
            config.net.delay_micros = delay;
        }
        if let Some(interval) = self.heartbeat {
            config.heartbeat.interval_secs = interval;
        }
        if let Some(path) = self.common.lock_file {
            config.daemon.lock_path = path;
        }
        if self.foreground {
            config.daemon.foreground = true;
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StressConfig> {
    match path {
        Some(path) => StressConfig::load(path),
        None => Ok(StressConfig::load_or_default()),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

/// Report a daemon failure and map it to its exit status.
fn fail(e: DaemonError) -> ExitCode {
    error!(error = %e, "stressgen failed");
    eprintln!("stressgen: {}", e);
    ExitCode::from(e.exit_code())
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(args.common.config.as_deref())?;
    args.apply(&mut config);
    stressgen::init_logging(&config.logging)?;

    // Nothing to run: leave any running instance alone.
    if !config.has_load() {
        info!("no load sources configured, nothing to do");
        return Ok(ExitCode::SUCCESS);
    }

    if config.net.raw_frames {
        if let Err(e) = daemon::require_root() {
            return Ok(fail(e));
        }
    }

    let lock_path = config.daemon.lock_path.clone();
    match singleton::terminate_previous(&lock_path, config.daemon.takeover_policy()) {
        Ok(outcome) => debug!(?outcome, "previous instance check done"),
        Err(e) => return Ok(fail(e.into())),
    }

    // Fork before the runtime exists: only the calling thread survives.
    if !config.daemon.foreground {
        match daemon::detach() {
            Ok(Detached::Parent) => return Ok(ExitCode::SUCCESS),
            Ok(Detached::Child) => {}
            Err(e) => return Ok(fail(e)),
        }
    }

    let runtime = build_runtime()?;
    let outcome = runtime.block_on(generate_load(config, lock_path));
    // Abandoned workers are plain threads; the runtime has nothing left worth
    // waiting for.
    runtime.shutdown_timeout(Duration::from_millis(100));
    outcome
}

/// Take the lock and run the load until a termination signal.
///
/// Signal handlers go in before the lock is taken, so a `stop` that sees our
/// pid can always reach us.
async fn generate_load(config: StressConfig, lock_path: PathBuf) -> Result<ExitCode> {
    let stop = stressgen::shutdown_signal()?;

    let mut lock = DaemonLock::new(&lock_path);
    if let Err(e) = lock.acquire() {
        return Ok(fail(e.into()));
    }
    info!(pid = std::process::id(), lock = %lock_path.display(), "stressgen started");

    let outcome = stressgen::run_until(config, Shutdown::new(), stop).await;
    lock.release();
    outcome?;
    info!("stressgen exiting");
    Ok(ExitCode::SUCCESS)
}

fn stop(args: StopArgs) -> Result<ExitCode> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(path) = args.common.lock_file {
        config.daemon.lock_path = path;
    }
    stressgen::init_logging(&config.logging)?;

    match singleton::terminate_previous(&config.daemon.lock_path, config.daemon.takeover_policy()) {
        Ok(Takeover::Terminated { pid }) => println!("stopped stressgen (pid {})", pid),
        Ok(Takeover::NoPrevious | Takeover::Stale) => println!("stressgen is not running"),
        Err(e) => return Ok(fail(e.into())),
    }
    Ok(ExitCode::SUCCESS)
}

fn monitor(args: MonitorArgs) -> Result<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    stressgen::init_logging(&config.logging)?;

    let runtime = build_runtime()?;
    runtime.block_on(serve_monitor(args.port, args.bind))?;
    Ok(ExitCode::SUCCESS)
}

async fn serve_monitor(port: u16, bind: SocketAddr) -> Result<()> {
    let stop = stressgen::shutdown_signal()?;
    stressgen::monitor::serve(port, bind, stop).await
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Stop(args) => stop(args),
        Commands::Monitor(args) => monitor(args),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "stressgen failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
