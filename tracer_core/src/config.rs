//! Configuration types for the navigation core.
//!
//! These are the runtime configuration structs used by `NavigatorCore`.
//! They are separate from the TOML-deserialized config in `tracer_config`.

use tracer_traits::LINE_SENSOR_COUNT;

/// Line-position estimator tuning.
#[derive(Debug, Clone)]
pub struct EstimatorCfg {
    /// Per-sensor weights, left to right. Sign encodes the side.
    pub weights: [f32; LINE_SENSOR_COUNT],
    /// A raw reading below this counts as "line seen" for that sensor.
    pub line_threshold: u16,
    /// Minimum sum of normalized strengths required to trust a position.
    pub min_signal: f32,
    /// Number of samples taken per sensor during calibration.
    pub calibration_samples: u32,
    /// Delay between calibration samples (ms).
    pub calibration_delay_ms: u64,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            weights: [-2.5, -1.2, -0.6, 0.6, 1.2, 2.5],
            line_threshold: 600,
            min_signal: 50.0,
            calibration_samples: 400,
            calibration_delay_ms: 30,
        }
    }
}

/// Marker sensor pair configuration.
#[derive(Debug, Clone)]
pub struct MarkerCfg {
    /// Minimum spacing between two marker samples (ms).
    pub read_interval_ms: u64,
    /// A raw reading below this counts as "marker seen".
    pub threshold: u16,
    /// Finish-line crossings after which the stop sequence arms.
    pub lap_target: u32,
}

impl Default for MarkerCfg {
    fn default() -> Self {
        Self {
            read_interval_ms: 2,
            threshold: 600,
            lap_target: 2,
        }
    }
}

/// Speed control law. All speeds are motor power units (0..=255).
#[derive(Debug, Clone)]
pub struct SpeedCfg {
    /// `|error|` above this is a turn.
    pub turn_threshold: i32,
    /// `|error|` below this is a straight.
    pub straight_threshold: i32,
    /// Fixed speed while turning; also the floor of every output.
    pub turn_speed: i32,
    /// Straight-line baseline in normal mode.
    pub fast_speed: i32,
    /// Straight-line baseline (and ceiling) in precision mode.
    pub slow_speed: i32,
    /// Absolute ceiling, reached only with boost.
    pub max_speed: i32,
    /// Extra speed added per tick while boosting.
    pub boost_increment: i32,
    /// Number of ticks a post-turn boost lasts.
    pub boost_ticks: u32,
    /// Max speed increase per tick.
    pub accel_step: i32,
    /// Max speed decrease per tick. Must exceed `accel_step`.
    pub brake_step: i32,
}

impl Default for SpeedCfg {
    fn default() -> Self {
        Self {
            turn_threshold: 60,
            straight_threshold: 20,
            turn_speed: 90,
            fast_speed: 200,
            slow_speed: 140,
            max_speed: 240,
            boost_increment: 30,
            boost_ticks: 150,
            accel_step: 2,
            brake_step: 6,
        }
    }
}

/// Steering PD controller and output mixing.
#[derive(Debug, Clone)]
pub struct SteeringCfg {
    pub kp: f32,
    pub kd: f32,
    /// Weight of the newest error delta in the derivative filter. Range: (0.0, 1.0].
    pub filter_alpha: f32,
    /// Base speed above which the correction is attenuated.
    pub high_speed_threshold: i32,
    /// Factor applied to the correction above `high_speed_threshold`.
    pub high_speed_attenuation: f32,
}

impl Default for SteeringCfg {
    fn default() -> Self {
        Self {
            kp: 5.0,
            kd: 600.0,
            filter_alpha: 0.6,
            high_speed_threshold: 180,
            high_speed_attenuation: 0.85,
        }
    }
}

/// End-of-run stop sequence.
#[derive(Debug, Clone)]
pub struct StopCfg {
    /// Window after arming during which speed is clamped to `brake_speed` (ms).
    pub slowdown_ms: u64,
    /// Delay after arming until motors are cut (ms).
    pub stop_ms: u64,
    pub brake_speed: i32,
}

impl Default for StopCfg {
    fn default() -> Self {
        Self {
            slowdown_ms: 50,
            stop_ms: 300,
            brake_speed: 60,
        }
    }
}

/// Loop pacing and the wall-clock guard.
#[derive(Debug, Clone)]
pub struct LoopCfg {
    /// Control ticks per second; each tick sleeps one period on the clock.
    pub loop_hz: u32,
    /// Hard cap on a single run in milliseconds.
    pub max_run_ms: u64,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            loop_hz: 1000,
            max_run_ms: 120_000,
        }
    }
}

/// Every tuning block of the navigator in one place.
#[derive(Debug, Clone, Default)]
pub struct NavigatorCfg {
    pub estimator: EstimatorCfg,
    pub markers: MarkerCfg,
    pub speed: SpeedCfg,
    pub steering: SteeringCfg,
    pub stop: StopCfg,
    pub run: LoopCfg,
}
