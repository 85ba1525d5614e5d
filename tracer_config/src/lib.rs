#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration storage for the line tracer.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//!   Every section is optional; omitted keys take the tuned defaults.
//! - Line-sensor calibration tables round-trip through a CSV file with
//!   strict headers.
//! - `[[profiles]]` hold named parameter overrides for diagnostic runs.
use serde::{Deserialize, Serialize};
use tracer_traits::{LINE_SENSOR_COUNT, ProfileSource};

/// Highest motor power accepted anywhere in the config.
const MAX_POWER: i32 = 255;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorCfg {
    pub weights: [f32; LINE_SENSOR_COUNT],
    pub line_threshold: u16,
    pub min_signal: f32,
    pub calibration_samples: u32,
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarkerCfg {
    pub read_interval_ms: u64,
    pub threshold: u16,
    /// Finish-line crossings before the stop sequence arms.
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SpeedCfg {
    pub turn_threshold: i32,
    pub straight_threshold: i32,
    pub turn_speed: i32,
    pub fast_speed: i32,
    pub slow_speed: i32,
    pub max_speed: i32,
    pub boost_increment: i32,
    pub boost_ticks: u32,
    pub accel_step: i32,
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SteeringCfg {
    pub kp: f32,
    pub kd: f32,
    /// Derivative filter coefficient. Range: (0.0, 1.0].
    pub filter_alpha: f32,
    pub high_speed_threshold: i32,
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StopCfg {
    pub slowdown_ms: u64,
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Read the line sensors inside the control tick.
    #[default]
    Direct,
    /// Background sampler thread feeding snapshots.
    Sampler,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerCfg {
    pub loop_hz: u32,
    /// Hard cap on one run (ms).
    pub max_run_ms: u64,
    pub mode: RunMode,
    /// Sampler rate when `mode = "sampler"`.
    pub sample_hz: u32,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            loop_hz: 1000,
            max_run_ms: 120_000,
            mode: RunMode::Direct,
            sample_hz: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryCfg {
    pub enabled: bool,
    /// JSON-lines sink; without it samples go to the tracing log.
    pub file: Option<String>,
    /// Record one tick in every N.
    pub every_n: u32,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            file: None,
            every_n: 10,
        }
    }
}

/// Wiring of the Raspberry Pi backend. Ignored by the simulator.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pins {
    pub spi_bus: u8,
    pub spi_slave_select: u8,
    pub spi_clock_hz: u32,
    /// ADC channels of the line array, left to right.
    pub line_channels: [u8; LINE_SENSOR_COUNT],
    pub marker_left_channel: u8,
    pub marker_right_channel: u8,
    /// Hardware PWM channels (0 or 1).
    pub pwm_left: u8,
    pub pwm_right: u8,
    pub pwm_frequency_hz: f64,
    /// BCM pins selecting wheel direction.
    pub dir_left: u8,
    pub dir_right: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            spi_slave_select: 0,
            spi_clock_hz: 1_000_000,
            line_channels: [0, 1, 2, 3, 4, 5],
            marker_left_channel: 6,
            marker_right_channel: 7,
            pwm_left: 0,
            pwm_right: 1,
            pwm_frequency_hz: 20_000.0,
            dir_left: 5,
            dir_right: 6,
        }
    }
}

/// Line-sensor extrema stored from an earlier calibration.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct PersistedCalibration {
    pub min: [u16; LINE_SENSOR_COUNT],
    pub max: [u16; LINE_SENSOR_COUNT],
}

impl PersistedCalibration {
    pub fn validate(&self) -> eyre::Result<()> {
        for i in 0..LINE_SENSOR_COUNT {
            if self.min[i] > self.max[i] {
                eyre::bail!(
                    "calibration sensor {i}: min {} exceeds max {}",
                    self.min[i],
                    self.max[i]
                );
            }
        }
        Ok(())
    }
}

/// Named set of overrides for a diagnostic run. Unset fields keep the
/// configured value.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    /// Replaces the normal-mode straight-line speed.
    pub speed: Option<i32>,
    pub kp: Option<f32>,
    pub kd: Option<f32>,
    pub filter_coefficient: Option<f32>,
}

impl ProfileSource for Profile {
    fn speed_value(&self, default: i32) -> i32 {
        self.speed.unwrap_or(default)
    }
    fn kp(&self, default: f32) -> f32 {
        self.kp.unwrap_or(default)
    }
    fn kd(&self, default: f32) -> f32 {
        self.kd.unwrap_or(default)
    }
    fn filter_coefficient(&self, default: f32) -> f32 {
        self.filter_coefficient.unwrap_or(default)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub estimator: EstimatorCfg,
    pub markers: MarkerCfg,
    pub speed: SpeedCfg,
    pub steering: SteeringCfg,
    pub stop: StopCfg,
    /// Runner/orchestration defaults
    pub runner: RunnerCfg,
    pub logging: Logging,
    pub telemetry: TelemetryCfg,
    pub pins: Pins,
    /// Optional persisted calibration; preferred at runtime over CSV when present.
    pub calibration: Option<PersistedCalibration>,
    pub profiles: Vec<Profile>,
    /// Name of the profile applied when the CLI does not pick one.
    pub active_profile: Option<String>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The profile named by `active_profile`, if any.
    pub fn active(&self) -> Option<&Profile> {
        self.active_profile.as_deref().and_then(|n| self.profile(n))
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Estimator
        let e = &self.estimator;
        if e.weights.iter().any(|w| !w.is_finite()) {
            eyre::bail!("estimator.weights must be finite");
        }
        if !e.min_signal.is_finite() || e.min_signal < 0.0 {
            eyre::bail!("estimator.min_signal must be >= 0");
        }
        if e.calibration_samples == 0 {
            eyre::bail!("estimator.calibration_samples must be >= 1");
        }
        if e.calibration_delay_ms > 10_000 {
            eyre::bail!("estimator.calibration_delay_ms is unreasonably large (>10s)");
        }

        // Markers
        if self.markers.read_interval_ms > 1000 {
            eyre::bail!("markers.read_interval_ms is unreasonably large (>1s)");
        }
        if self.markers.lap_target == 0 {
            eyre::bail!("markers.lap_target must be >= 1");
        }

        // Speed
        let s = &self.speed;
        if s.straight_threshold < 0 {
            eyre::bail!("speed.straight_threshold must be >= 0");
        }
        if s.straight_threshold >= s.turn_threshold {
            eyre::bail!("speed.straight_threshold must be < speed.turn_threshold");
        }
        if s.turn_speed < 0 {
            eyre::bail!("speed.turn_speed must be >= 0");
        }
        if s.slow_speed < s.turn_speed {
            eyre::bail!("speed.slow_speed must be >= speed.turn_speed");
        }
        if s.fast_speed < s.slow_speed {
            eyre::bail!("speed.fast_speed must be >= speed.slow_speed");
        }
        if s.max_speed < s.fast_speed {
            eyre::bail!("speed.max_speed must be >= speed.fast_speed");
        }
        if s.max_speed > MAX_POWER {
            eyre::bail!("speed.max_speed must be <= {MAX_POWER}");
        }
        if s.boost_increment < 0 {
            eyre::bail!("speed.boost_increment must be >= 0");
        }
        if s.accel_step <= 0 {
            eyre::bail!("speed.accel_step must be > 0");
        }
        if s.brake_step <= s.accel_step {
            eyre::bail!("speed.brake_step must be > speed.accel_step");
        }

        // Steering
        let st = &self.steering;
        if !st.kp.is_finite() || !st.kd.is_finite() {
            eyre::bail!("steering.kp and steering.kd must be finite");
        }
        if !(st.filter_alpha > 0.0 && st.filter_alpha <= 1.0) {
            eyre::bail!("steering.filter_alpha must be in (0.0, 1.0]");
        }
        if !(st.high_speed_attenuation > 0.0 && st.high_speed_attenuation <= 1.0) {
            eyre::bail!("steering.high_speed_attenuation must be in (0.0, 1.0]");
        }

        // Stop
        if !(0..=MAX_POWER).contains(&self.stop.brake_speed) {
            eyre::bail!("stop.brake_speed must be in [0, {MAX_POWER}]");
        }
        if self.stop.slowdown_ms > self.stop.stop_ms {
            eyre::bail!("stop.slowdown_ms must be <= stop.stop_ms");
        }

        // Runner
        if self.runner.loop_hz == 0 || self.runner.loop_hz > 20_000 {
            eyre::bail!("runner.loop_hz must be in [1, 20000]");
        }
        if self.runner.sample_hz == 0 || self.runner.sample_hz > 20_000 {
            eyre::bail!("runner.sample_hz must be in [1, 20000]");
        }
        if self.runner.max_run_ms == 0 {
            eyre::bail!("runner.max_run_ms must be >= 1");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got '{r}'");
        }

        // Telemetry
        if self.telemetry.every_n == 0 {
            eyre::bail!("telemetry.every_n must be >= 1");
        }

        // Pins
        if self.pins.pwm_left > 1 || self.pins.pwm_right > 1 {
            eyre::bail!("pins.pwm_left and pins.pwm_right must be 0 or 1");
        }
        if self.pins.pwm_left == self.pins.pwm_right {
            eyre::bail!("pins.pwm_left and pins.pwm_right must differ");
        }
        let adc = self
            .pins
            .line_channels
            .iter()
            .chain([&self.pins.marker_left_channel, &self.pins.marker_right_channel]);
        let mut seen = [false; 8];
        for &ch in adc {
            if ch > 7 {
                eyre::bail!("pins: ADC channel {ch} out of range 0..=7");
            }
            if seen[usize::from(ch)] {
                eyre::bail!("pins: ADC channel {ch} assigned twice");
            }
            seen[usize::from(ch)] = true;
        }
        if !(self.pins.pwm_frequency_hz.is_finite() && self.pins.pwm_frequency_hz > 0.0) {
            eyre::bail!("pins.pwm_frequency_hz must be > 0");
        }

        // Calibration
        if let Some(c) = &self.calibration {
            c.validate()?;
        }

        // Profiles
        for (i, p) in self.profiles.iter().enumerate() {
            if p.name.trim().is_empty() {
                eyre::bail!("profiles[{i}].name must not be empty");
            }
            if self.profiles[..i].iter().any(|q| q.name == p.name) {
                eyre::bail!("profiles: duplicate name '{}'", p.name);
            }
            if let Some(v) = p.speed
                && !(0..=MAX_POWER).contains(&v)
            {
                eyre::bail!("profiles[{i}].speed must be in [0, {MAX_POWER}]");
            }
            if let Some(a) = p.filter_coefficient
                && !(a > 0.0 && a <= 1.0)
            {
                eyre::bail!("profiles[{i}].filter_coefficient must be in (0.0, 1.0]");
            }
        }
        if let Some(name) = &self.active_profile
            && self.profile(name).is_none()
        {
            eyre::bail!("active_profile '{name}' is not defined in [[profiles]]");
        }

        Ok(())
    }
}

/// Calibration CSV schema.
///
/// Expected headers:
/// sensor,min,max
///
/// Example:
/// sensor,min,max
/// 0,112,903
/// 1,98,911
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct CalibrationRow {
    pub sensor: usize,
    pub min: u16,
    pub max: u16,
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<PersistedCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["sensor", "min", "max"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'sensor,min,max', got: {}",
            actual.join(",")
        );
    }

    let mut filled = [false; LINE_SENSOR_COUNT];
    let mut cal = PersistedCalibration {
        min: [0; LINE_SENSOR_COUNT],
        max: [0; LINE_SENSOR_COUNT],
    };
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        let row = match rec {
            Ok(row) => row,
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        };
        if row.sensor >= LINE_SENSOR_COUNT {
            eyre::bail!(
                "invalid CSV row {}: sensor {} out of range 0..={}",
                idx + 2,
                row.sensor,
                LINE_SENSOR_COUNT - 1
            );
        }
        if filled[row.sensor] {
            eyre::bail!("invalid CSV row {}: sensor {} listed twice", idx + 2, row.sensor);
        }
        filled[row.sensor] = true;
        cal.min[row.sensor] = row.min;
        cal.max[row.sensor] = row.max;
    }
    if let Some(missing) = filled.iter().position(|f| !f) {
        eyre::bail!("calibration CSV is missing sensor {missing}");
    }
    cal.validate()?;
    Ok(cal)
}

pub fn save_calibration_csv(
    path: &std::path::Path,
    cal: &PersistedCalibration,
) -> eyre::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| eyre::eyre!("create calibration CSV {:?}: {}", path, e))?;
    for sensor in 0..LINE_SENSOR_COUNT {
        wtr.serialize(CalibrationRow {
            sensor,
            min: cal.min[sensor],
            max: cal.max[sensor],
        })
        .map_err(|e| eyre::eyre!("write calibration CSV {:?}: {}", path, e))?;
    }
    wtr.flush()
        .map_err(|e| eyre::eyre!("flush calibration CSV {:?}: {}", path, e))?;
    Ok(())
}
