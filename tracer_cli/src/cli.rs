//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Effective limits of the current run (for JSON error details).
pub static LAST_LIMITS: OnceLock<CliLimits> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliLimits {
    pub max_run_ms: u64,
    pub lap_target: u32,
}

#[derive(Parser, Debug)]
#[command(name = "tracer", version, about = "Line follower CLI")]
pub struct Cli {
    /// Path to config TOML (built-in defaults when omitted)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Optional calibration CSV (strict header); wins over [calibration] in the config
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines and print a JSON result line
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

/// Real-time knobs shared by the commands that drive the motors.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on supported OSes.\n\nLinux: Attempts SCHED_FIFO priority, pins to a CPU, and locks the address space into RAM. This reduces page faults and jitter in the control loop but may require elevated privileges or ulimits (e.g., memlock).\n\nmacOS: Only memory locking is applied."
    )]
    pub rt: bool,
    /// Real-time priority for SCHED_FIFO on Linux (1..=max); ignored elsewhere
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Select memory locking mode for --rt: none, current, or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin the process to when --rt is enabled (Linux only, default 0)
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the line until the lap target is reached and the vehicle stops
    Run {
        /// Override runner.max_run_ms (hard cap on the run)
        #[arg(long, value_name = "MS")]
        max_run_ms: Option<u64>,
        /// Read the line sensors inside the control loop
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "sampler")]
        direct: bool,
        /// Read the line sensors on a background thread at runner.sample_hz
        #[arg(long, action = ArgAction::SetTrue)]
        sampler: bool,
        /// Named parameter profile from the config (overrides active_profile)
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Write per-tick telemetry as JSON lines to this file
        #[arg(long, value_name = "FILE")]
        telemetry: Option<PathBuf>,
        /// Run the calibration sweep before driving instead of using a stored table
        #[arg(long, action = ArgAction::SetTrue)]
        calibrate: bool,
        #[command(flatten)]
        rt: RtArgs,
        /// Print control loop timing stats
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
    },
    /// Spin in place over the line, record min/max per sensor, and save them as CSV
    Calibrate {
        /// Output CSV path
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
        /// Wheel power used while spinning (opposite signs per wheel)
        #[arg(long, value_name = "POWER", default_value_t = 60)]
        spin: i32,
    },
    /// Read every sensor once and command the motors to zero
    SelfCheck,
    /// Health check for operational monitoring (no hardware access)
    Health,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn direct_and_sampler_conflict() {
        let r = Cli::try_parse_from(["tracer", "run", "--direct", "--sampler"]);
        assert!(r.is_err());
    }

    #[test]
    fn config_is_optional() {
        let cli = Cli::try_parse_from(["tracer", "health"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.log_level.is_none());
    }
}
