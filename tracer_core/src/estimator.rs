//! Line-position estimation from the six-channel reflectance array.
//!
//! Calibration records the raw extrema of every channel. Each tick the raw
//! snapshot is turned into per-channel darkness strengths (0..=1000) using
//! those extrema, then reduced to a signed position in `[-100, 100]` by a
//! weighted average. When the line is lost the estimate saturates toward the
//! side it was last seen on.

use std::time::Duration;

use eyre::WrapErr;
use tracer_traits::{Clock, LINE_SENSOR_COUNT, LineSensors, SensorSnapshot};

use crate::config::EstimatorCfg;
use crate::error::{Result, TracerError};
use crate::hw_error::map_hw_error;

/// Full-scale value of the 10-bit ADC feeding the sensors.
pub const ADC_FULL_SCALE: u16 = 1023;

/// Strength of a channel sitting squarely over the line.
pub const STRENGTH_FULL: f32 = 1000.0;

/// Position reported when the line sits fully on one side.
pub const POSITION_LIMIT: i32 = 100;

/// Per-channel raw extrema recorded during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationTable {
    pub min: [u16; LINE_SENSOR_COUNT],
    pub max: [u16; LINE_SENSOR_COUNT],
}

impl Default for CalibrationTable {
    /// Uncalibrated: the whole ADC range.
    fn default() -> Self {
        Self {
            min: [0; LINE_SENSOR_COUNT],
            max: [ADC_FULL_SCALE; LINE_SENSOR_COUNT],
        }
    }
}

impl CalibrationTable {
    /// Start value for an extrema search.
    fn seed() -> Self {
        Self {
            min: [u16::MAX; LINE_SENSOR_COUNT],
            max: [0; LINE_SENSOR_COUNT],
        }
    }

    fn observe(&mut self, snapshot: &SensorSnapshot) {
        for (i, &raw) in snapshot.iter().enumerate() {
            self.min[i] = self.min[i].min(raw);
            self.max[i] = self.max[i].max(raw);
        }
    }

    /// True when every channel has `min <= max`.
    pub fn is_valid(&self) -> bool {
        self.min.iter().zip(self.max.iter()).all(|(lo, hi)| lo <= hi)
    }

    /// Darkness of channel `i` in `0..=1000`: 0 at the channel's brightest
    /// calibrated reading, 1000 at its darkest. A channel whose extrema
    /// coincide contributes nothing.
    #[inline]
    pub fn strength(&self, i: usize, raw: u16) -> f32 {
        let lo = f32::from(self.min[i]);
        let hi = f32::from(self.max[i]);
        let span = hi - lo;
        if span <= 0.0 {
            return 0.0;
        }
        ((hi - f32::from(raw)) * STRENGTH_FULL / span).clamp(0.0, STRENGTH_FULL)
    }
}

/// Sample every channel `samples` times, `delay` apart, and keep the extrema.
///
/// Blocks; runs once before the control loop starts.
pub fn calibrate<L: LineSensors + ?Sized>(
    sensors: &mut L,
    clock: &dyn Clock,
    samples: u32,
    delay: Duration,
) -> Result<CalibrationTable> {
    if samples == 0 {
        return Err(eyre::Report::new(TracerError::Config(
            "calibration needs at least one sample".into(),
        )));
    }
    let mut table = CalibrationTable::seed();
    for n in 0..samples {
        let snapshot = sensors
            .read()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err_with(|| format!("calibration sample {n}"))?;
        table.observe(&snapshot);
        clock.sleep(delay);
    }
    tracing::info!(min = ?table.min, max = ?table.max, samples, "line sensors calibrated");
    Ok(table)
}

/// Output of one estimation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionSample {
    /// Signed offset of the line, `-100` (far left) to `100` (far right).
    pub position: i32,
    pub line_detected: bool,
}

#[derive(Debug, Clone)]
pub struct PositionEstimator {
    cfg: EstimatorCfg,
    table: CalibrationTable,
    last_valid: i32,
}

impl PositionEstimator {
    pub fn new(cfg: EstimatorCfg, table: CalibrationTable) -> Self {
        Self {
            cfg,
            table,
            last_valid: 0,
        }
    }

    pub fn cfg(&self) -> &EstimatorCfg {
        &self.cfg
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.table
    }

    pub fn set_calibration(&mut self, table: CalibrationTable) {
        self.table = table;
    }

    /// Last position computed from a trusted reading.
    pub fn last_valid(&self) -> i32 {
        self.last_valid
    }

    /// Forget the last trusted position. Call at run start.
    pub fn reset(&mut self) {
        self.last_valid = 0;
    }

    /// Reduce one snapshot to a position. Never fails; a lost line yields the
    /// saturated extreme on the side of the last trusted position.
    pub fn estimate(&mut self, snapshot: &SensorSnapshot) -> PositionSample {
        let line_detected = snapshot.iter().any(|&raw| raw < self.cfg.line_threshold);

        let mut weighted = 0.0_f32;
        let mut magnitude = 0.0_f32;
        for (i, &raw) in snapshot.iter().enumerate() {
            let s = self.table.strength(i, raw);
            weighted += self.cfg.weights[i] * s;
            magnitude += s;
        }

        if line_detected && magnitude > self.cfg.min_signal {
            // magnitude can only be zero here with a negative min_signal
            if magnitude > 0.0 {
                let p = (100.0 * weighted / magnitude).round();
                self.last_valid = (p as i32).clamp(-POSITION_LIMIT, POSITION_LIMIT);
            }
            return PositionSample {
                position: self.last_valid,
                line_detected: true,
            };
        }

        let position = if self.last_valid < 0 {
            -POSITION_LIMIT
        } else {
            POSITION_LIMIT
        };
        tracing::trace!(position, magnitude, "line lost, holding last side");
        PositionSample {
            position,
            line_detected: false,
        }
    }
}
