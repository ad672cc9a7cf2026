//! atmolog - log, schedule and publish an AtmoWEB incubator.
//!
//! Meant to be invoked from a timer: `atmolog` runs one cycle and exits.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use atmolog_core::AtmoWebClient;
use atmolog_service::{Config, Cycle, RunOptions, Task, run_every, status};
use atmolog_sync::GitStore;

/// Log, schedule and publish an AtmoWEB incubator.
#[derive(Parser, Debug)]
#[command(name = "atmolog")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "ATMOLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Device address as host or host:port (overrides config).
    #[arg(short, long, global = true, env = "ATMOLOG_DEVICE")]
    device: Option<String>,

    /// History file (overrides config).
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    /// Schedule file (overrides config).
    #[arg(long, global = true)]
    schedule: Option<PathBuf>,

    /// Schedule tolerance window in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    tolerance: Option<u64>,

    /// History retention in hours.
    #[arg(long, global = true, value_name = "HOURS")]
    max_age_hours: Option<f64>,

    /// Keep running, one cycle per interval.
    #[arg(long, global = true)]
    continuous: bool,

    /// Seconds between cycles in continuous mode.
    #[arg(long, global = true, value_name = "SECS")]
    interval: Option<u64>,

    /// Stop continuous mode after this many hours.
    #[arg(long, global = true, value_name = "HOURS", requires = "continuous")]
    duration_hours: Option<f64>,

    /// Report due entries without writing to the device, the ledger or the remote.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Record locally but do not publish.
    #[arg(long, global = true)]
    no_publish: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Sample, apply the schedule and publish (default).
    Cycle,
    /// Sample and record only, then publish.
    Log,
    /// Apply the schedule only, then publish.
    Schedule,
    /// Publish only.
    Sync,
    /// Print history and schedule state as JSON.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = if args.quiet {
        EnvFilter::new("warn")
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;

    let task = match args.command.unwrap_or(Command::Cycle) {
        Command::Status => {
            let report = status::collect(&config, OffsetDateTime::now_utc())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Cycle => Task::Full,
        Command::Log => Task::Log,
        Command::Schedule => Task::Schedule,
        Command::Sync => Task::Sync,
    };

    let device = AtmoWebClient::new(
        &config.device.address,
        config.device.port,
        config.device.timeout(),
    )?
    .with_mode_key(config.device.mode_key.clone());

    let store = if config.sync.enabled {
        Some(
            GitStore::new(&config.sync.repo_path, &config.sync.remote, &config.sync.branch)
                .with_timeout(config.sync.command_timeout())
                .with_ssh_key(config.sync.ssh_key.clone()),
        )
    } else {
        info!("Sync disabled in configuration");
        None
    };

    let options = RunOptions {
        dry_run: args.dry_run,
        no_publish: args.no_publish,
    };
    let period = config.schedule.check_interval();
    let cycle = Cycle::new(config, options, device, store);

    let report = if args.continuous {
        let limit = match args.duration_hours {
            Some(hours) => Some(
                Duration::try_from_secs_f64(hours * 3600.0)
                    .with_context(|| format!("invalid --duration-hours {}", hours))?,
            ),
            None => None,
        };
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                debug!("Ctrl-C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        };
        let cycle = &cycle;
        run_every(period, limit, shutdown, move || {
            cycle.run(task, OffsetDateTime::now_utc())
        })
        .await
        .unwrap_or_default()
    } else {
        cycle.run(task, OffsetDateTime::now_utc()).await
    };

    Ok(ExitCode::from(report.exit_code()))
}

/// Load the configuration file and apply command line overrides.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(device) = &args.device {
        config.device.set_endpoint(device);
    }
    if let Some(path) = &args.history {
        config.history.path = from_cwd(path)?;
    }
    if let Some(path) = &args.schedule {
        config.schedule.path = from_cwd(path)?;
    }
    if let Some(secs) = args.tolerance {
        config.schedule.tolerance_secs = secs;
    }
    if let Some(hours) = args.max_age_hours {
        config.history.max_age_hours = hours;
    }
    if let Some(secs) = args.interval {
        config.schedule.check_interval_secs = secs;
    }
    if args.duration_hours.is_some_and(|h| !h.is_finite() || h <= 0.0) {
        bail!("--duration-hours must be a positive number");
    }

    config.validate()?;
    debug!("Configuration: {:?}", config);
    Ok(config)
}

/// Paths given on the command line are relative to the working directory,
/// not to the repository.
fn from_cwd(path: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path {}", path.display()))
}
