//! Intervalometer daemon entry point.
//!
//! Hosts a wall-clock-aligned interval trigger inside a reactor: every tick
//! logs the aligned wall-clock timestamp, SIGINT/SIGTERM stop the loop, and a
//! lateness summary is logged at shutdown. External consumers (a camera
//! trigger, a capture pipeline) would hang their own work off the same tick
//! callback.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use ivm_common::config::DaemonConfig;
use ivm_common::metrics::TickMetrics;
use ivm_sched::clock::SystemClock;
use ivm_sched::reactor::Reactor;
use ivm_sched::trigger::{Interval, IntervalTrigger, Tick};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Intervalometer daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ivm-daemon",
    about = "Intervalometer daemon - fires a callback on wall-clock-aligned interval boundaries",
    version,
    long_about = None
)]
struct Args {
    /// Path to a daemon configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Trigger interval, e.g. "10s" or "2m 30s" (overrides config file).
    #[arg(long, short = 'i', value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Maximum ticks to fire before exiting (overrides config file; 0 = unbounded).
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting intervalometer daemon");

    let mut config = load_config(&args)?;

    // Override with command-line arguments
    if let Some(interval) = args.interval {
        config.interval = interval;
    }
    if let Some(max_ticks) = args.max_ticks {
        config.max_ticks = max_ticks;
    }
    config.validate()?;

    info!(
        interval = %humantime::format_duration(config.interval),
        max_ticks = config.max_ticks,
        "Configuration loaded"
    );

    run_daemon(&config)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("ivm_daemon={level},ivm_sched={level},ivm_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `IVM_CONFIG_PATH` environment variable
/// 3. `/etc/intervalometer/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<DaemonConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return DaemonConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var("IVM_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from IVM_CONFIG_PATH");
            return DaemonConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from IVM_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "IVM_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    // 3. System path
    let system_path = PathBuf::from("/etc/intervalometer/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return DaemonConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    // 4. Local development path
    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return DaemonConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    // 5. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(DaemonConfig::default())
}

/// Wire up the reactor and trigger, then run until a signal or tick limit.
fn run_daemon(config: &DaemonConfig) -> Result<()> {
    let clock = SystemClock::probe().context("System clock unavailable")?;
    let interval = Interval::from_duration(config.interval)?;

    let mut reactor = Reactor::new(clock);
    signals::install(reactor.quit_handle()).context("Failed to set up signal handlers")?;

    let tolerance_us =
        i64::try_from(config.lateness_tolerance.as_micros()).unwrap_or(i64::MAX);
    let max_ticks = config.max_ticks;
    let mut fired = 0u64;

    let mut trigger = IntervalTrigger::new(interval, clock, move || {
        info!(
            at = %humantime::format_rfc3339_micros(SystemTime::now()),
            "Tick"
        );

        fired += 1;
        if max_ticks > 0 && fired >= max_ticks {
            info!(ticks = fired, "Maximum tick count reached");
            return Tick::Stop;
        }
        Tick::Continue
    })
    .with_metrics(TickMetrics::new(
        config.metrics.histogram_size,
        tolerance_us,
    ));

    let metrics = trigger.metrics();
    trigger.start().context("Failed to start trigger")?;

    let id = reactor.attach(Box::new(trigger));
    info!("Trigger attached, entering main loop");

    reactor.run();

    // Detach releases the trigger (and its callback) deterministically;
    // it is a no-op when the callback already stopped itself.
    let _ = reactor.detach(id);

    info!("Shutting down...");
    let snapshot = metrics.borrow().snapshot();
    if config.metrics.enabled {
        info!(
            ticks = snapshot.total_ticks,
            late_ticks = snapshot.late_count,
            max_lateness_us = snapshot.max_us.unwrap_or(0),
            mean_lateness_us = snapshot.mean_us.unwrap_or(0),
            signals = signals::signal_count(),
            "Daemon shutdown complete"
        );
    } else {
        info!(
            ticks = snapshot.total_ticks,
            signals = signals::signal_count(),
            "Daemon shutdown complete"
        );
    }

    Ok(())
}
