//! Type-state builder for `Navigator` and generic `build_navigator` constructor.
//!
//! The builder enforces at compile time that line sensors, marker sensors and
//! motors are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use tracer_traits::{
    Clock, LineSensors, MarkerSensors, MonotonicClock, Motors, NoProfile, NoTelemetry,
    ProfileSource, SensorSnapshot, Telemetry,
};

use crate::config::*;
use crate::core::NavigatorCore;
use crate::error::{BuildError, Result};
use crate::estimator::{CalibrationTable, PositionEstimator, PositionSample};
use crate::marker::MarkerMachine;
use crate::speed::{MotionState, SpeedController};
use crate::status::DriveStatus;
use crate::steering::{MotorCommand, SteeringController};
use crate::stop::{StopPhase, StopSequencer};

// ── Public dynamic-dispatch wrapper ──────────────────────────────────────────

type DynCore = NavigatorCore<
    Box<dyn LineSensors>,
    Box<dyn MarkerSensors>,
    Box<dyn Motors>,
    Box<dyn Telemetry>,
>;

/// Navigator with boxed collaborators, for callers that pick hardware at
/// runtime.
pub struct Navigator {
    pub(crate) inner: DynCore,
}

impl core::fmt::Debug for Navigator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Navigator")
            .field("position", &self.inner.last_sample.position)
            .field("phase", &self.inner.stop.phase())
            .field("laps", &self.inner.stop.lap_count())
            .finish()
    }
}

impl Navigator {
    /// Start building a Navigator.
    pub fn builder() -> NavigatorBuilder<Missing, Missing, Missing> {
        NavigatorBuilder::default()
    }

    /// Reset per-run state. Call before a new run.
    pub fn begin(&mut self) {
        self.inner.begin();
    }

    /// Calibrate the line sensors in place.
    pub fn calibrate(&mut self) -> Result<CalibrationTable> {
        self.inner.calibrate()
    }

    pub fn calibration(&self) -> &CalibrationTable {
        self.inner.calibration()
    }

    /// One tick of the control loop.
    pub fn step(&mut self) -> Result<DriveStatus> {
        self.inner.step()
    }

    /// One tick on an externally sampled snapshot.
    pub fn step_with_snapshot(&mut self, snapshot: &SensorSnapshot) -> Result<DriveStatus> {
        self.inner.step_with_snapshot(snapshot)
    }

    /// Command zero power (best-effort).
    pub fn motor_stop(&mut self) -> Result<()> {
        self.inner.motor_stop()
    }

    pub fn last_sample(&self) -> PositionSample {
        self.inner.last_sample()
    }

    pub fn last_command(&self) -> MotorCommand {
        self.inner.last_command()
    }

    pub fn motion(&self) -> &MotionState {
        self.inner.motion()
    }

    pub fn phase(&self) -> StopPhase {
        self.inner.phase()
    }

    pub fn lap_count(&self) -> u32 {
        self.inner.lap_count()
    }

    pub fn intersections(&self) -> u32 {
        self.inner.intersections()
    }

    pub fn is_robot_stopped(&self) -> bool {
        self.inner.is_robot_stopped()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Navigator`. All fields are validated on `build()`.
pub struct NavigatorBuilder<L, K, M> {
    line: Option<Box<dyn LineSensors>>,
    markers: Option<Box<dyn MarkerSensors>>,
    motors: Option<Box<dyn Motors>>,
    cfg: NavigatorCfg,
    calibration: Option<CalibrationTable>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    telemetry: Option<Box<dyn Telemetry>>,
    profile: Option<Box<dyn ProfileSource>>,
    _l: PhantomData<L>,
    _k: PhantomData<K>,
    _m: PhantomData<M>,
}

impl Default for NavigatorBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            line: None,
            markers: None,
            motors: None,
            cfg: NavigatorCfg::default(),
            calibration: None,
            clock: None,
            telemetry: None,
            profile: None,
            _l: PhantomData,
            _k: PhantomData,
            _m: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Reject configurations the control law cannot run with.
pub fn validate(cfg: &NavigatorCfg) -> Result<()> {
    let e = &cfg.estimator;
    if e.weights.iter().any(|w| !w.is_finite()) {
        return Err(invalid("estimator weights must be finite"));
    }
    if !e.min_signal.is_finite() || e.min_signal < 0.0 {
        return Err(invalid("min_signal must be finite and >= 0"));
    }
    if e.calibration_samples == 0 {
        return Err(invalid("calibration_samples must be >= 1"));
    }

    if cfg.markers.lap_target == 0 {
        return Err(invalid("lap_target must be >= 1"));
    }

    let s = &cfg.speed;
    if s.straight_threshold < 0 || s.straight_threshold >= s.turn_threshold {
        return Err(invalid("need 0 <= straight_threshold < turn_threshold"));
    }
    if !(0 <= s.turn_speed
        && s.turn_speed <= s.slow_speed
        && s.slow_speed <= s.fast_speed
        && s.fast_speed <= s.max_speed
        && s.max_speed <= crate::MAX_POWER)
    {
        return Err(invalid(
            "need 0 <= turn_speed <= slow_speed <= fast_speed <= max_speed <= 255",
        ));
    }
    if s.boost_increment < 0 {
        return Err(invalid("boost_increment must be >= 0"));
    }
    if s.accel_step <= 0 {
        return Err(invalid("accel_step must be > 0"));
    }
    if s.brake_step <= s.accel_step {
        return Err(invalid("brake_step must exceed accel_step"));
    }

    let st = &cfg.steering;
    if !st.kp.is_finite() || !st.kd.is_finite() {
        return Err(invalid("steering gains must be finite"));
    }
    if !(st.filter_alpha > 0.0 && st.filter_alpha <= 1.0) {
        return Err(invalid("filter_alpha must be in (0, 1]"));
    }
    if !(st.high_speed_attenuation > 0.0 && st.high_speed_attenuation <= 1.0) {
        return Err(invalid("high_speed_attenuation must be in (0, 1]"));
    }

    let stop = &cfg.stop;
    if !(0..=crate::MAX_POWER).contains(&stop.brake_speed) {
        return Err(invalid("brake_speed must be in 0..=255"));
    }
    if stop.slowdown_ms > stop.stop_ms {
        return Err(invalid("slowdown_ms must not exceed stop_ms"));
    }

    if cfg.run.loop_hz == 0 {
        return Err(invalid("loop_hz must be > 0"));
    }
    if cfg.run.max_run_ms == 0 {
        return Err(invalid("max_run_ms must be >= 1"));
    }
    Ok(())
}

/// Fold profile overrides into the configuration.
fn apply_profile(cfg: &mut NavigatorCfg, profile: &dyn ProfileSource) {
    cfg.speed.fast_speed = profile.speed_value(cfg.speed.fast_speed);
    cfg.steering.kp = profile.kp(cfg.steering.kp);
    cfg.steering.kd = profile.kd(cfg.steering.kd);
    cfg.steering.filter_alpha = profile.filter_coefficient(cfg.steering.filter_alpha);
}

/// Validate configuration and construct a `NavigatorCore`.
///
/// This is the single source of truth for validation and construction,
/// used by both `NavigatorBuilder::try_build()` and `build_navigator()`.
#[allow(clippy::too_many_arguments)]
fn validate_and_build<L, K, M, T>(
    line: L,
    markers: K,
    motors: M,
    telemetry: T,
    mut cfg: NavigatorCfg,
    calibration: Option<CalibrationTable>,
    profile: &dyn ProfileSource,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<NavigatorCore<L, K, M, T>>
where
    L: LineSensors,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    apply_profile(&mut cfg, profile);
    validate(&cfg)?;

    let calibration = calibration.unwrap_or_default();
    if !calibration.is_valid() {
        return Err(invalid("calibration min must not exceed max"));
    }

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => c,
        None => Arc::new(MonotonicClock::new()),
    };

    let NavigatorCfg {
        estimator,
        markers: marker_cfg,
        speed,
        steering,
        stop,
        run,
    } = cfg;
    let lap_target = marker_cfg.lap_target;

    Ok(NavigatorCore {
        line,
        markers,
        motors,
        telemetry,
        estimator: PositionEstimator::new(estimator, calibration),
        marker: MarkerMachine::new(marker_cfg, clock.clone()),
        speed: SpeedController::new(speed),
        steering: SteeringController::new(steering),
        stop: StopSequencer::new(stop, lap_target, clock.clone()),
        clock,
        period_us: crate::util::period_us(run.loop_hz),
        last_sample: PositionSample::default(),
        last_correction: 0.0,
        last_command: MotorCommand::STOP,
        intersections: 0,
        ticks: 0,
    })
}

impl<L, K, M> NavigatorBuilder<L, K, M> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Navigator> {
        let line = self
            .line
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLineSensors))?;
        let markers = self
            .markers
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMarkerSensors))?;
        let motors = self
            .motors
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMotors))?;
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Box::new(NoTelemetry));
        let profile = self.profile.unwrap_or_else(|| Box::new(NoProfile));

        let inner = validate_and_build(
            line,
            markers,
            motors,
            telemetry,
            self.cfg,
            self.calibration,
            &*profile,
            self.clock.map(Arc::from),
        )?;
        Ok(Navigator { inner })
    }
}

/// Chainable setters that do not affect type-state.
impl<L, K, M> NavigatorBuilder<L, K, M> {
    pub fn with_config(mut self, cfg: NavigatorCfg) -> Self {
        self.cfg = cfg;
        self
    }
    pub fn with_estimator(mut self, estimator: EstimatorCfg) -> Self {
        self.cfg.estimator = estimator;
        self
    }
    pub fn with_marker_cfg(mut self, markers: MarkerCfg) -> Self {
        self.cfg.markers = markers;
        self
    }
    pub fn with_speed(mut self, speed: SpeedCfg) -> Self {
        self.cfg.speed = speed;
        self
    }
    pub fn with_steering(mut self, steering: SteeringCfg) -> Self {
        self.cfg.steering = steering;
        self
    }
    pub fn with_stop(mut self, stop: StopCfg) -> Self {
        self.cfg.stop = stop;
        self
    }
    pub fn with_loop(mut self, run: LoopCfg) -> Self {
        self.cfg.run = run;
        self
    }
    /// Use a stored calibration instead of the full-range default.
    pub fn with_calibration(mut self, calibration: CalibrationTable) -> Self {
        self.calibration = Some(calibration);
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    pub fn with_telemetry(mut self, telemetry: impl Telemetry + 'static) -> Self {
        self.telemetry = Some(Box::new(telemetry));
        self
    }
    /// Parameter overrides, applied before validation.
    pub fn with_profile(mut self, profile: impl ProfileSource + 'static) -> Self {
        self.profile = Some(Box::new(profile));
        self
    }
}

// Setters that advance type-state
impl<K, M> NavigatorBuilder<Missing, K, M> {
    pub fn with_line_sensors(
        self,
        line: impl LineSensors + 'static,
    ) -> NavigatorBuilder<Set, K, M> {
        NavigatorBuilder {
            line: Some(Box::new(line)),
            markers: self.markers,
            motors: self.motors,
            cfg: self.cfg,
            calibration: self.calibration,
            clock: self.clock,
            telemetry: self.telemetry,
            profile: self.profile,
            _l: PhantomData,
            _k: PhantomData,
            _m: PhantomData,
        }
    }
}

impl<L, M> NavigatorBuilder<L, Missing, M> {
    pub fn with_marker_sensors(
        self,
        markers: impl MarkerSensors + 'static,
    ) -> NavigatorBuilder<L, Set, M> {
        NavigatorBuilder {
            line: self.line,
            markers: Some(Box::new(markers)),
            motors: self.motors,
            cfg: self.cfg,
            calibration: self.calibration,
            clock: self.clock,
            telemetry: self.telemetry,
            profile: self.profile,
            _l: PhantomData,
            _k: PhantomData,
            _m: PhantomData,
        }
    }
}

impl<L, K> NavigatorBuilder<L, K, Missing> {
    pub fn with_motors(self, motors: impl Motors + 'static) -> NavigatorBuilder<L, K, Set> {
        NavigatorBuilder {
            line: self.line,
            markers: self.markers,
            motors: Some(Box::new(motors)),
            cfg: self.cfg,
            calibration: self.calibration,
            clock: self.clock,
            telemetry: self.telemetry,
            profile: self.profile,
            _l: PhantomData,
            _k: PhantomData,
            _m: PhantomData,
        }
    }
}

impl NavigatorBuilder<Set, Set, Set> {
    /// Validate and build. Only available once every collaborator is set.
    pub fn build(self) -> Result<Navigator> {
        self.try_build()
    }
}

/// Generic, statically-dispatched alias using the unified core.
pub type NavigatorG<L, K, M, T = NoTelemetry> = NavigatorCore<L, K, M, T>;

/// Build a generic, statically-dispatched `NavigatorG` from concrete parts.
///
/// Delegates to the shared `validate_and_build`.
#[allow(clippy::too_many_arguments)]
pub fn build_navigator<L, K, M, T>(
    line: L,
    markers: K,
    motors: M,
    telemetry: T,
    cfg: NavigatorCfg,
    calibration: Option<CalibrationTable>,
    profile: Option<&dyn ProfileSource>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<NavigatorG<L, K, M, T>>
where
    L: LineSensors,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    validate_and_build(
        line,
        markers,
        motors,
        telemetry,
        cfg,
        calibration,
        profile.unwrap_or(&NoProfile),
        clock,
    )
}
