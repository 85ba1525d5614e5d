//! Run orchestration: config mapping, profile and telemetry selection, and the
//! call into the core runner.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracer_config::{Config, PersistedCalibration, Profile};
use tracer_core::error::{AbortReason, Result as CoreResult};
use tracer_core::runner::{RunParams, RunSummary, SamplingMode};
use tracer_core::{CalibrationTable, NavigatorCfg, TracingTelemetry};
use tracer_traits::{NoTelemetry, ProfileSource, Telemetry};

use crate::backend::Backend;
use crate::cli::{CliLimits, LAST_LIMITS, RtArgs, RtLock};
use crate::rt::setup_rt_once;
use crate::telemetry::{JsonlTelemetry, StatsTelemetry, TickStats};

pub fn abort_reason_name(r: &AbortReason) -> &'static str {
    match r {
        AbortReason::MaxRuntime => "MaxRuntime",
        AbortReason::Shutdown => "Shutdown",
    }
}

pub fn mode_name(mode: SamplingMode) -> &'static str {
    match mode {
        SamplingMode::Direct => "direct",
        SamplingMode::Paced(_) => "sampler",
    }
}

/// Options of the `run` subcommand.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_run_ms: Option<u64>,
    pub direct: bool,
    pub sampler: bool,
    pub profile: Option<String>,
    pub telemetry: Option<PathBuf>,
    pub calibrate: bool,
    pub rt: RtArgs,
    pub stats: bool,
}

/// `--direct`/`--sampler` win over `[runner].mode`.
pub fn resolve_mode(cfg: &Config, opts: &RunOptions) -> SamplingMode {
    if opts.direct {
        SamplingMode::Direct
    } else if opts.sampler {
        SamplingMode::Paced(cfg.runner.sample_hz)
    } else {
        SamplingMode::from(&cfg.runner)
    }
}

/// `--profile` wins over `active_profile`; an unknown name is an error.
pub fn resolve_profile<'a>(cfg: &'a Config, name: Option<&str>) -> eyre::Result<Option<&'a Profile>> {
    match name {
        Some(n) => cfg
            .profile(n)
            .map(Some)
            .ok_or_else(|| eyre::eyre!("unknown profile '{n}' (not defined in [[profiles]])")),
        None => Ok(cfg.active()),
    }
}

/// CSV (already loaded) wins over `[calibration]`; neither means the default table.
pub fn resolve_calibration(
    cfg: &Config,
    csv: Option<&PersistedCalibration>,
) -> Option<CalibrationTable> {
    csv.or(cfg.calibration.as_ref()).map(CalibrationTable::from)
}

fn make_telemetry(cfg: &Config, opts: &RunOptions) -> eyre::Result<Box<dyn Telemetry>> {
    let t = &cfg.telemetry;
    let configured = t.file.as_ref().filter(|_| t.enabled).map(PathBuf::from);
    let file = opts.telemetry.clone().or(configured);
    if let Some(path) = file {
        tracing::info!(path = %path.display(), every_n = t.every_n, "telemetry to file");
        return Ok(Box::new(JsonlTelemetry::create(&path, t.every_n)?));
    }
    if t.enabled {
        return Ok(Box::new(TracingTelemetry::new(t.every_n)));
    }
    Ok(Box::new(NoTelemetry))
}

pub fn run_navigation(
    cfg: &Config,
    csv_calibration: Option<&PersistedCalibration>,
    opts: &RunOptions,
    backend: Backend,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunSummary> {
    setup_rt_once(
        opts.rt.rt,
        opts.rt.rt_prio,
        opts.rt.rt_lock.unwrap_or(RtLock::os_default()),
        opts.rt.rt_cpu,
    );

    let mut nav_cfg = NavigatorCfg::from(cfg);
    if let Some(ms) = opts.max_run_ms {
        nav_cfg.run.max_run_ms = ms;
    }
    let _ = LAST_LIMITS.set(CliLimits {
        max_run_ms: nav_cfg.run.max_run_ms,
        lap_target: nav_cfg.markers.lap_target,
    });

    let profile = resolve_profile(cfg, opts.profile.as_deref())?
        .cloned()
        .map(|p| -> Box<dyn ProfileSource> {
            tracing::info!(profile = %p.name, "profile active");
            Box::new(p)
        });
    let mode = resolve_mode(cfg, opts);
    let loop_hz = nav_cfg.run.loop_hz;

    let stats = Rc::new(RefCell::new(TickStats::default()));
    let mut telemetry = make_telemetry(cfg, opts)?;
    if opts.stats {
        telemetry = Box::new(StatsTelemetry::new(
            telemetry,
            tracer_core::util::period_us(loop_hz),
            stats.clone(),
        ));
    }

    let Backend {
        line,
        markers,
        motors,
        clock,
        name,
    } = backend;
    tracing::debug!(backend = name, mode = mode_name(mode), "run configured");

    let summary = tracer_core::runner::run(
        line,
        markers,
        motors,
        telemetry,
        RunParams {
            cfg: nav_cfg,
            calibration: resolve_calibration(cfg, csv_calibration),
            calibrate: opts.calibrate,
            profile,
            mode,
            clock: Some(clock),
            shutdown: Some(shutdown),
        },
    )?;

    if opts.stats {
        print_stats(&stats.borrow(), summary.ticks, loop_hz);
    }
    Ok(summary)
}

/// Print loop interval stats to stderr.
fn print_stats(stats: &TickStats, ticks: u64, loop_hz: u32) {
    let v = &stats.intervals_us;
    if v.is_empty() {
        return;
    }
    let expected_period_us = tracer_core::util::period_us(loop_hz);
    let min = v.iter().min().copied().unwrap_or(0);
    let max = v.iter().max().copied().unwrap_or(0);
    let n = v.len() as f64;
    let avg = v.iter().sum::<u64>() as f64 / n;
    let stdev = if v.len() > 1 {
        let var = v.iter().map(|&x| (x as f64 - avg).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt()
    } else {
        0.0
    };
    eprintln!("\n--- Tracer Stats ---");
    eprintln!("Ticks: {ticks}");
    eprintln!("Period (us): {expected_period_us}");
    eprintln!("Interval min/avg/max/stdev (us): {min} / {avg:.1} / {max} / {stdev:.1}");
    eprintln!("Overruns (> 1.5 periods): {}", stats.overruns);
    eprintln!("--------------------\n");
}
