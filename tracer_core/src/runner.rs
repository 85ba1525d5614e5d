use crate::builder::build_navigator;
use crate::config::NavigatorCfg;
use crate::error::{AbortReason, Report, Result as CoreResult, TracerError};
use crate::estimator::{self, CalibrationTable};
use crate::mocks::NoopLineSensors;
use crate::sampler::Sampler;
use crate::status::DriveStatus;
use crate::stop::StopPhase;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracer_traits::{
    Clock, LineSensors, MarkerSensors, MonotonicClock, Motors, ProfileSource, Telemetry,
};

/// How line sampling should be orchestrated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Read inside the control loop via `LineSensors::read`
    Direct,
    /// Background thread sampling at the given Hz
    Paced(u32),
}

/// Everything a run needs besides the collaborators.
pub struct RunParams {
    pub cfg: NavigatorCfg,
    /// Stored calibration; ignored when `calibrate` is set.
    pub calibration: Option<CalibrationTable>,
    /// Run the calibration sweep before driving.
    pub calibrate: bool,
    pub profile: Option<Box<dyn ProfileSource>>,
    pub mode: SamplingMode,
    /// Clock for the control loop; `MonotonicClock` when absent.
    pub clock: Option<Arc<dyn Clock + Send + Sync>>,
    /// Raised by a signal handler to end the run early.
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            cfg: NavigatorCfg::default(),
            calibration: None,
            calibrate: false,
            profile: None,
            mode: SamplingMode::Direct,
            clock: None,
            shutdown: None,
        }
    }
}

/// Outcome of a run that reached the terminal stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub laps: u32,
    pub intersections: u32,
    pub ticks: u64,
    pub elapsed_ms: u64,
    pub calibration: CalibrationTable,
}

/// Floor for the sampler stall watchdog.
const MIN_STALL_MS: u64 = 20;

/// Compute the stall watchdog threshold in milliseconds.
///
/// Start from four sampling periods so a couple of missed samples do not trip
/// it, never go below `MIN_STALL_MS`, and stay strictly below `max_run_ms` so
/// the watchdog can fire before the hard cap.
#[inline]
fn compute_stall_threshold_ms(period_ms: u64, max_run_ms: u64) -> u64 {
    debug_assert!((1..=crate::util::MILLIS_PER_SEC).contains(&period_ms));
    let safe = std::cmp::max(fast_threshold_ms(period_ms), MIN_STALL_MS);
    cap_below_max_run(safe, max_run_ms)
}

/// Four sampling periods.
#[inline]
fn fast_threshold_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(4)
}

/// Cap a threshold to be strictly below `max_run_ms` and at least 1ms.
#[inline]
fn cap_below_max_run(threshold: u64, max_run_ms: u64) -> u64 {
    threshold.min(max_run_ms.saturating_sub(1)).max(1)
}

#[inline]
fn stalled_now(elapsed_ms: u64, stalled_ms: u64, threshold_ms: u64) -> bool {
    elapsed_ms >= threshold_ms && stalled_ms > threshold_ms
}

fn abort(reason: AbortReason) -> Report {
    Report::new(TracerError::Abort(reason))
}

fn shutdown_requested(flag: Option<&Arc<AtomicBool>>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Drive until the stop sequence latches, the wall-clock cap is hit, or a
/// shutdown is requested. Motors are stopped on every exit path.
pub fn run<L, K, M, T>(
    line: L,
    markers: K,
    motors: M,
    telemetry: T,
    params: RunParams,
) -> CoreResult<RunSummary>
where
    L: LineSensors + Send + 'static,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    match params.mode {
        SamplingMode::Direct => run_direct(line, markers, motors, telemetry, params),
        SamplingMode::Paced(hz) => run_sampled(line, markers, motors, telemetry, params, hz),
    }
}

/// Resolve the clock and, when asked, calibrate before the sensors are handed on.
fn prepare<L: LineSensors>(
    line: &mut L,
    params: &RunParams,
) -> CoreResult<(Arc<dyn Clock + Send + Sync>, Option<CalibrationTable>)> {
    let clock: Arc<dyn Clock + Send + Sync> = match &params.clock {
        Some(c) => c.clone(),
        None => Arc::new(MonotonicClock::new()),
    };
    let calibration = if params.calibrate {
        let e = &params.cfg.estimator;
        Some(estimator::calibrate(
            line,
            &*clock,
            e.calibration_samples,
            Duration::from_millis(e.calibration_delay_ms),
        )?)
    } else {
        params.calibration
    };
    Ok((clock, calibration))
}

fn run_direct<L, K, M, T>(
    mut line: L,
    markers: K,
    motors: M,
    telemetry: T,
    params: RunParams,
) -> CoreResult<RunSummary>
where
    L: LineSensors,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    let (clock, calibration) = prepare(&mut line, &params)?;
    let max_run_ms = params.cfg.run.max_run_ms;
    let mut nav = build_navigator(
        line,
        markers,
        motors,
        telemetry,
        params.cfg,
        calibration,
        params.profile.as_deref(),
        Some(clock.clone()),
    )?;
    nav.begin();
    let start = clock.now();
    tracing::info!(mode = "direct", max_run_ms, "run start");

    loop {
        let elapsed_ms = clock.ms_since(start);
        if shutdown_requested(params.shutdown.as_ref()) {
            let _ = nav.motor_stop();
            tracing::warn!(elapsed_ms, "run interrupted");
            return Err(abort(AbortReason::Shutdown));
        }
        if elapsed_ms >= max_run_ms {
            let _ = nav.motor_stop();
            tracing::error!(elapsed_ms, laps = nav.lap_count(), "max run time exceeded");
            return Err(abort(AbortReason::MaxRuntime));
        }

        let status = match nav.step() {
            Ok(s) => s,
            Err(e) => {
                let _ = nav.motor_stop();
                return Err(e);
            }
        };
        if status == DriveStatus::Stopped {
            let summary = RunSummary {
                laps: nav.lap_count(),
                intersections: nav.intersections(),
                ticks: nav.ticks(),
                elapsed_ms: clock.ms_since(start),
                calibration: *nav.calibration(),
            };
            debug_assert_eq!(nav.phase(), StopPhase::Stopped);
            tracing::info!(laps = summary.laps, ticks = summary.ticks, elapsed_ms = summary.elapsed_ms, "run complete");
            return Ok(summary);
        }
    }
}

fn run_sampled<L, K, M, T>(
    mut line: L,
    markers: K,
    motors: M,
    telemetry: T,
    params: RunParams,
    hz: u32,
) -> CoreResult<RunSummary>
where
    L: LineSensors + Send + 'static,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    let (clock, calibration) = prepare(&mut line, &params)?;
    let max_run_ms = params.cfg.run.max_run_ms;
    let period_us = crate::util::period_us(hz);
    let stall_threshold_ms = compute_stall_threshold_ms(crate::util::period_ms(hz), max_run_ms);

    // Build first so a bad config never spawns a thread.
    let mut nav = build_navigator(
        NoopLineSensors,
        markers,
        motors,
        telemetry,
        params.cfg,
        calibration,
        params.profile.as_deref(),
        Some(clock.clone()),
    )?;
    // The sampler paces on wall time; the loop clock may be simulated.
    let sampler = Sampler::spawn(line, hz, Arc::new(MonotonicClock::new()));
    nav.begin();
    tracing::info!(mode = "sampler", hz, max_run_ms, "run start");

    let start = clock.now();
    let wall_start = Instant::now();
    loop {
        let elapsed_ms = clock.ms_since(start);
        if shutdown_requested(params.shutdown.as_ref()) {
            let _ = nav.motor_stop();
            tracing::warn!(elapsed_ms, "run interrupted");
            return Err(abort(AbortReason::Shutdown));
        }
        if elapsed_ms >= max_run_ms {
            let _ = nav.motor_stop();
            tracing::error!(elapsed_ms, laps = nav.lap_count(), "max run time exceeded");
            return Err(abort(AbortReason::MaxRuntime));
        }
        let wall_ms = u64::try_from(wall_start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if stalled_now(wall_ms, sampler.stalled_for_now(), stall_threshold_ms) {
            let _ = nav.motor_stop();
            tracing::error!(stall_threshold_ms, errors = sampler.error_count(), "line sampler stalled");
            return Err(Report::new(TracerError::Timeout).wrap_err("line sampler stalled"));
        }

        let Some(snapshot) = sampler.latest() else {
            // avoid busy spin if no sample yet
            std::thread::sleep(Duration::from_micros(period_us));
            continue;
        };
        let status = match nav.step_with_snapshot(&snapshot) {
            Ok(s) => s,
            Err(e) => {
                let _ = nav.motor_stop();
                return Err(e);
            }
        };
        if status == DriveStatus::Stopped {
            let summary = RunSummary {
                laps: nav.lap_count(),
                intersections: nav.intersections(),
                ticks: nav.ticks(),
                elapsed_ms: clock.ms_since(start),
                calibration: *nav.calibration(),
            };
            tracing::info!(laps = summary.laps, ticks = summary.ticks, elapsed_ms = summary.elapsed_ms, "run complete");
            return Ok(summary);
        }
    }
}
