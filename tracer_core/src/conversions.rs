//! `From` implementations bridging `tracer_config` types to `tracer_core` types.

use crate::config::{EstimatorCfg, LoopCfg, MarkerCfg, NavigatorCfg, SpeedCfg, SteeringCfg, StopCfg};
use crate::estimator::CalibrationTable;
use crate::runner::SamplingMode;

impl From<&tracer_config::EstimatorCfg> for EstimatorCfg {
    fn from(c: &tracer_config::EstimatorCfg) -> Self {
        Self {
            weights: c.weights,
            line_threshold: c.line_threshold,
            min_signal: c.min_signal,
            calibration_samples: c.calibration_samples,
            calibration_delay_ms: c.calibration_delay_ms,
        }
    }
}

impl From<&tracer_config::MarkerCfg> for MarkerCfg {
    fn from(c: &tracer_config::MarkerCfg) -> Self {
        Self {
            read_interval_ms: c.read_interval_ms,
            threshold: c.threshold,
            lap_target: c.lap_target,
        }
    }
}

impl From<&tracer_config::SpeedCfg> for SpeedCfg {
    fn from(c: &tracer_config::SpeedCfg) -> Self {
        Self {
            turn_threshold: c.turn_threshold,
            straight_threshold: c.straight_threshold,
            turn_speed: c.turn_speed,
            fast_speed: c.fast_speed,
            slow_speed: c.slow_speed,
            max_speed: c.max_speed,
            boost_increment: c.boost_increment,
            boost_ticks: c.boost_ticks,
            accel_step: c.accel_step,
            brake_step: c.brake_step,
        }
    }
}

impl From<&tracer_config::SteeringCfg> for SteeringCfg {
    fn from(c: &tracer_config::SteeringCfg) -> Self {
        Self {
            kp: c.kp,
            kd: c.kd,
            filter_alpha: c.filter_alpha,
            high_speed_threshold: c.high_speed_threshold,
            high_speed_attenuation: c.high_speed_attenuation,
        }
    }
}

impl From<&tracer_config::StopCfg> for StopCfg {
    fn from(c: &tracer_config::StopCfg) -> Self {
        Self {
            slowdown_ms: c.slowdown_ms,
            stop_ms: c.stop_ms,
            brake_speed: c.brake_speed,
        }
    }
}

impl From<&tracer_config::RunnerCfg> for LoopCfg {
    fn from(c: &tracer_config::RunnerCfg) -> Self {
        Self {
            loop_hz: c.loop_hz,
            max_run_ms: c.max_run_ms,
        }
    }
}

impl From<&tracer_config::RunnerCfg> for SamplingMode {
    fn from(c: &tracer_config::RunnerCfg) -> Self {
        match c.mode {
            tracer_config::RunMode::Direct => SamplingMode::Direct,
            tracer_config::RunMode::Sampler => SamplingMode::Paced(c.sample_hz),
        }
    }
}

impl From<&tracer_config::Config> for NavigatorCfg {
    fn from(c: &tracer_config::Config) -> Self {
        Self {
            estimator: (&c.estimator).into(),
            markers: (&c.markers).into(),
            speed: (&c.speed).into(),
            steering: (&c.steering).into(),
            stop: (&c.stop).into(),
            run: (&c.runner).into(),
        }
    }
}

impl From<&tracer_config::PersistedCalibration> for CalibrationTable {
    fn from(c: &tracer_config::PersistedCalibration) -> Self {
        Self {
            min: c.min,
            max: c.max,
        }
    }
}

impl From<&CalibrationTable> for tracer_config::PersistedCalibration {
    fn from(c: &CalibrationTable) -> Self {
        Self {
            min: c.min,
            max: c.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_agree() {
        let from_file = NavigatorCfg::from(&tracer_config::Config::default());
        let core = NavigatorCfg::default();
        assert_eq!(from_file.estimator.weights, core.estimator.weights);
        assert_eq!(from_file.markers.lap_target, core.markers.lap_target);
        assert_eq!(from_file.speed.fast_speed, core.speed.fast_speed);
        assert_eq!(from_file.speed.brake_step, core.speed.brake_step);
        assert_eq!(from_file.steering.kd, core.steering.kd);
        assert_eq!(from_file.stop.stop_ms, core.stop.stop_ms);
        assert_eq!(from_file.run.loop_hz, core.run.loop_hz);
    }

    #[test]
    fn sampler_mode_carries_rate() {
        let mut r = tracer_config::RunnerCfg::default();
        assert_eq!(SamplingMode::from(&r), SamplingMode::Direct);
        r.mode = tracer_config::RunMode::Sampler;
        r.sample_hz = 500;
        assert_eq!(SamplingMode::from(&r), SamplingMode::Paced(500));
    }

    #[test]
    fn calibration_round_trips() {
        let t = CalibrationTable {
            min: [1, 2, 3, 4, 5, 6],
            max: [7, 8, 9, 10, 11, 12],
        };
        let p = tracer_config::PersistedCalibration::from(&t);
        assert_eq!(CalibrationTable::from(&p), t);
    }
}
