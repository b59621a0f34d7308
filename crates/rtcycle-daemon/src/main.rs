//! rtcycle entry point.
//!
//! Runs the single-worker or multi-worker cyclic executor with signal-driven
//! cancellation, and maps failures to the process exit status.

mod signals;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rtcycle_common::config::{AppConfig, ConfigError, SessionKind};
use rtcycle_common::error::{RtError, EXIT_CONFIG, EXIT_FAILURE};
use rtcycle_runtime::{
    check_rt_capabilities, log_report, run_single, CancelToken, Capability, EnvSession,
    LocalSession, MultiWorkerCoordinator, RealtimeEnvironment, RunSummary, Session,
    SingleWorkerRun, TelemetryTask, WorkerLauncher,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::signals::SignalWatcher;

/// rtcycle command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rtcycle",
    about = "Cyclic real-time task executor with absolute-time periods",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run one worker at a fixed period.
    Single {
        /// Cycle period (e.g. 30ms).
        #[arg(long, value_parser = humantime::parse_duration)]
        period: Option<Duration>,

        /// Number of task executions.
        #[arg(long)]
        runs: Option<u64>,
    },

    /// Run one worker per rank, each at its period-table entry.
    Multicore {
        /// Ranks hosted by this process (local session only).
        #[arg(long)]
        ranks: Option<usize>,

        /// Number of task executions per worker.
        #[arg(long)]
        runs: Option<u64>,

        /// Source of rank identity.
        #[arg(long, value_enum)]
        session: Option<SessionArg>,
    },

    /// Print real-time capability diagnostics.
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SessionArg {
    Local,
    Env,
}

impl From<SessionArg> for SessionKind {
    fn from(arg: SessionArg) -> Self {
        match arg {
            SessionArg::Local => SessionKind::Local,
            SessionArg::Env => SessionKind::Env,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rtcycle");

    match run(&args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("rtcycle={level},rtcycle_runtime={level},rtcycle_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Exit status for a failure anywhere in the error chain.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(rt) = cause.downcast_ref::<RtError>() {
            return rt.exit_code();
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG;
        }
    }
    EXIT_FAILURE
}

fn run(args: &Args) -> Result<u8> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, &args.command);
    config.validate()?;

    let cancel = CancelToken::new();

    match &args.command {
        Command::Single { .. } => {
            let _signals =
                SignalWatcher::install(cancel.clone()).context("Failed to set up signal handlers")?;
            run_single_worker(&config, cancel)
        }
        Command::Multicore { .. } => {
            let _signals =
                SignalWatcher::install(cancel.clone()).context("Failed to set up signal handlers")?;
            match config.multicore.session {
                SessionKind::Local => run_coordinated(
                    &config,
                    LocalSession::new(config.multicore.ranks),
                    &cancel,
                ),
                SessionKind::Env => run_coordinated(&config, EnvSession::new(), &cancel),
            }
        }
        Command::Check => {
            print_capabilities();
            Ok(0)
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTCYCLE_CONFIG_PATH` environment variable
/// 3. `/etc/rtcycle/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<AppConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return AppConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RTCYCLE_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RTCYCLE_CONFIG_PATH");
            return AppConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RTCYCLE_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RTCYCLE_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/rtcycle/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return AppConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return AppConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(AppConfig::default())
}

/// Command-line flags take precedence over file values.
fn apply_overrides(config: &mut AppConfig, command: &Command) {
    match command {
        Command::Single { period, runs } => {
            if let Some(period) = period {
                config.single.period = *period;
            }
            if let Some(runs) = runs {
                config.single.runs = *runs;
            }
        }
        Command::Multicore {
            ranks,
            runs,
            session,
        } => {
            if let Some(ranks) = ranks {
                config.multicore.ranks = *ranks;
            }
            if let Some(runs) = runs {
                config.multicore.runs = *runs;
            }
            if let Some(session) = session {
                config.multicore.session = (*session).into();
            }
        }
        Command::Check => {}
    }
}

fn run_single_worker(config: &AppConfig, cancel: CancelToken) -> Result<u8> {
    info!(
        period = ?config.single.period,
        runs = config.single.runs,
        policy = ?config.worker.policy,
        priority = config.worker.priority,
        "Single-worker run"
    );

    let mut env = RealtimeEnvironment::linux(config.realtime.clone());
    let mut launcher = WorkerLauncher::new(config.worker.clone());
    let run = SingleWorkerRun::new(TelemetryTask, config.single.period, config.single.runs)
        .with_cancel(cancel)
        .with_histogram_size(config.metrics.histogram_size);

    let summary = run_single(&mut env, &mut launcher, run)?;
    Ok(finish(&summary))
}

fn run_coordinated<S: Session + 'static>(
    config: &AppConfig,
    session: S,
    cancel: &CancelToken,
) -> Result<u8> {
    info!(
        ranks = session.local_ranks(),
        runs = config.multicore.runs,
        session = ?config.multicore.session,
        "Multi-worker run"
    );

    let mut env = RealtimeEnvironment::linux(config.realtime.clone());
    let mut launcher = WorkerLauncher::new(config.worker.clone());
    let coordinator = MultiWorkerCoordinator::new(
        session,
        config.multicore.period_table.clone(),
        config.multicore.runs,
    )
    .with_histogram_size(config.metrics.histogram_size);

    let summary = coordinator.run(&mut env, &mut launcher, |_| TelemetryTask, cancel)?;
    Ok(finish(&summary))
}

fn finish(summary: &RunSummary) -> u8 {
    for report in &summary.reports {
        log_report(report);
    }

    let code = summary.exit_code();
    info!(
        workers = summary.reports.len(),
        failures = summary.failures.len(),
        total_executions = summary.total_executions(),
        exit_code = code,
        "Run complete"
    );
    code
}

fn print_capabilities() {
    let caps = check_rt_capabilities();
    let yes_no = |b: bool| if b { "yes" } else { "no" };

    println!("root:                {}", yes_no(caps.is_root));
    println!("PREEMPT_RT kernel:   {}", yes_no(caps.preempt_rt));
    println!("RLIMIT_RTPRIO:       {:?}", caps.rtprio_limit);
    println!("RLIMIT_MEMLOCK:      {:?}", caps.memlock_limit);
    match caps.capabilities {
        Some(set) => {
            for cap in [Capability::SysNice, Capability::IpcLock] {
                let name = format!("{cap}:");
                println!(
                    "{name:<20} permitted={} effective={}",
                    yes_no(set.is_permitted(cap)),
                    yes_no(set.is_effective(cap))
                );
            }
        }
        None => println!("capabilities:        unreadable"),
    }
    println!(
        "RT scheduling:       {}",
        yes_no(caps.can_use_rt_scheduling())
    );
    println!("memory locking:      {}", yes_no(caps.can_lock_memory()));
}
