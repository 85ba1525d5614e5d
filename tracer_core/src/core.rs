//! The unified navigation control loop (`NavigatorCore`).
//!
//! One call to [`NavigatorCore::step`] is one tick of the pipeline:
//! marker machine, stop sequencer, position estimator, speed controller,
//! steering, then the motor command. Diagnostics observe the finished tick.

use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tracer_traits::diag::{FLAG_PRECISION_MODE, FLAG_TURNING};
use tracer_traits::{
    Clock, LineSensors, MarkerSensors, Motors, NoTelemetry, PerformanceSample, SensorSnapshot,
    Telemetry,
};

use crate::error::Result;
use crate::estimator::{self, CalibrationTable, PositionEstimator, PositionSample};
use crate::hw_error::map_hw_error;
use crate::marker::{MarkerEvent, MarkerMachine};
use crate::speed::{MotionState, SpeedController};
use crate::status::DriveStatus;
use crate::steering::{MotorCommand, SteeringController};
use crate::stop::{StopPhase, StopSequencer};

/// Unified core for both dynamic (boxed) and generic (static dispatch) variants.
pub struct NavigatorCore<L, K, M, T = NoTelemetry>
where
    L: LineSensors,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    pub(crate) line: L,
    pub(crate) markers: K,
    pub(crate) motors: M,
    pub(crate) telemetry: T,
    pub(crate) estimator: PositionEstimator,
    pub(crate) marker: MarkerMachine,
    pub(crate) speed: SpeedController,
    pub(crate) steering: SteeringController,
    pub(crate) stop: StopSequencer,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) period_us: u64,

    pub(crate) last_sample: PositionSample,
    pub(crate) last_correction: f32,
    pub(crate) last_command: MotorCommand,
    pub(crate) intersections: u32,
    pub(crate) ticks: u64,
}

impl<L, K, M, T> core::fmt::Debug for NavigatorCore<L, K, M, T>
where
    L: LineSensors,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NavigatorCore")
            .field("position", &self.last_sample.position)
            .field("motion", self.speed.state())
            .field("phase", &self.stop.phase())
            .field("laps", &self.stop.lap_count())
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl<L, K, M, T> NavigatorCore<L, K, M, T>
where
    L: LineSensors,
    K: MarkerSensors,
    M: Motors,
    T: Telemetry,
{
    /// Reset per-run state. Calibration survives.
    pub fn begin(&mut self) {
        self.estimator.reset();
        self.marker.reset();
        self.speed.reset();
        self.steering.reset();
        self.stop.reset();
        self.last_sample = PositionSample::default();
        self.last_correction = 0.0;
        self.last_command = MotorCommand::STOP;
        self.intersections = 0;
        self.ticks = 0;
    }

    /// Run the blocking calibration sweep on the line sensors and install the
    /// result.
    pub fn calibrate(&mut self) -> Result<CalibrationTable> {
        let cfg = self.estimator.cfg();
        let samples = cfg.calibration_samples;
        let delay = Duration::from_millis(cfg.calibration_delay_ms);
        let table = estimator::calibrate(&mut self.line, &*self.clock, samples, delay)?;
        self.estimator.set_calibration(table);
        Ok(table)
    }

    pub fn set_calibration(&mut self, table: CalibrationTable) {
        self.estimator.set_calibration(table);
    }

    pub fn calibration(&self) -> &CalibrationTable {
        self.estimator.calibration()
    }

    /// One tick, reading the line sensors directly.
    pub fn step(&mut self) -> Result<DriveStatus> {
        if let Some(status) = self.pre_drive()? {
            return Ok(status);
        }
        let snapshot = self
            .line
            .read()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("reading line sensors")?;
        self.drive(&snapshot)
    }

    /// One tick on a snapshot taken elsewhere (background sampler).
    pub fn step_with_snapshot(&mut self, snapshot: &SensorSnapshot) -> Result<DriveStatus> {
        if let Some(status) = self.pre_drive()? {
            return Ok(status);
        }
        self.drive(snapshot)
    }

    /// Command zero power on both wheels.
    pub fn motor_stop(&mut self) -> Result<()> {
        self.last_command = MotorCommand::STOP;
        self.motors
            .set_power(0, 0)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("motor_stop")
    }

    pub fn last_sample(&self) -> PositionSample {
        self.last_sample
    }

    pub fn last_correction(&self) -> f32 {
        self.last_correction
    }

    pub fn last_command(&self) -> MotorCommand {
        self.last_command
    }

    pub fn motion(&self) -> &MotionState {
        self.speed.state()
    }

    pub fn phase(&self) -> StopPhase {
        self.stop.phase()
    }

    pub fn lap_count(&self) -> u32 {
        self.stop.lap_count()
    }

    pub fn intersections(&self) -> u32 {
        self.intersections
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_robot_stopped(&self) -> bool {
        self.stop.is_robot_stopped()
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }

    /// Tear the core apart, handing back the collaborators.
    pub fn into_parts(self) -> (L, K, M, T) {
        (self.line, self.markers, self.motors, self.telemetry)
    }

    // ── Private: tick stages ─────────────────────────────────────────────────

    /// Marker machine and stop sequencer. Returns a status when the tick
    /// ends here.
    fn pre_drive(&mut self) -> Result<Option<DriveStatus>> {
        if self.stop.is_robot_stopped() {
            return Ok(Some(DriveStatus::Stopped));
        }

        if let Some(event) = self.marker.poll(&mut self.markers)? {
            self.dispatch(event);
        }

        if self.stop.advance() == StopPhase::Stopped {
            self.speed.halt();
            self.motor_stop()?;
            return Ok(Some(DriveStatus::Stopped));
        }
        Ok(None)
    }

    fn dispatch(&mut self, event: MarkerEvent) {
        match event {
            MarkerEvent::FinishLine => {
                self.stop.record_finish();
            }
            MarkerEvent::ModeToggle => self.speed.toggle_mode(),
            MarkerEvent::Intersection => {
                self.intersections = self.intersections.saturating_add(1);
                tracing::info!(count = self.intersections, "intersection");
            }
        }
    }

    fn drive(&mut self, snapshot: &SensorSnapshot) -> Result<DriveStatus> {
        let sample = self.estimator.estimate(snapshot);
        // Setpoint is the array centre.
        let error = sample.position;

        let mut speed = self.speed.update(error);
        if let Some(limit) = self.stop.speed_limit() {
            speed = self.speed.cap(limit);
        }

        let (correction, cmd) = self.steering.command(error, speed);
        self.motors
            .set_power(cmd.left, cmd.right)
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("set_power")?;

        self.last_sample = sample;
        self.last_correction = correction;
        self.last_command = cmd;
        self.ticks = self.ticks.saturating_add(1);

        if self.telemetry.is_logging() {
            let sample = self.performance_sample(error, correction, cmd);
            self.telemetry.log_performance(&sample);
        }
        self.telemetry.process();

        tracing::trace!(
            position = sample.position,
            detected = sample.line_detected,
            speed,
            left = cmd.left,
            right = cmd.right,
            "tick"
        );

        self.clock.sleep(Duration::from_micros(self.period_us));
        Ok(DriveStatus::Running)
    }

    fn performance_sample(&self, error: i32, correction: f32, cmd: MotorCommand) -> PerformanceSample {
        let motion = self.speed.state();
        let mut state_flags = 0;
        if motion.is_precision_mode {
            state_flags |= FLAG_PRECISION_MODE;
        }
        if motion.is_turning {
            state_flags |= FLAG_TURNING;
        }
        PerformanceSample {
            position: self.last_sample.position,
            error,
            correction,
            left_power: cmd.left,
            right_power: cmd.right,
            state_flags,
        }
    }
}
