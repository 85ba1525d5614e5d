//! Diagnostic capabilities: parameter profiles and performance logging.
//!
//! Both are optional collaborators of the navigation core. The `No*` types are
//! the defaults and compile down to nothing.

/// Bit set in [`PerformanceSample::state_flags`] while precision mode is active.
pub const FLAG_PRECISION_MODE: u8 = 1 << 0;
/// Bit set in [`PerformanceSample::state_flags`] while a turn is detected.
pub const FLAG_TURNING: u8 = 1 << 1;

/// Parameter lookup used by diagnostic builds to tune a run without
/// rebuilding. Each lookup returns `default` unchanged when no override applies
/// and must not keep per-call state.
pub trait ProfileSource {
    fn speed_value(&self, default: i32) -> i32 {
        default
    }
    fn kp(&self, default: f32) -> f32 {
        default
    }
    fn kd(&self, default: f32) -> f32 {
        default
    }
    fn filter_coefficient(&self, default: f32) -> f32 {
        default
    }
}

/// No profile active: every lookup yields its default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProfile;

impl ProfileSource for NoProfile {}

/// Final control values of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub position: i32,
    pub error: i32,
    pub correction: f32,
    pub left_power: i32,
    pub right_power: i32,
    /// bit0 = precision mode, bit1 = turn detected, bits 2..=7 reserved.
    pub state_flags: u8,
}

/// Observer of the control loop. Calls happen after a tick's values are final
/// and must never feed back into them.
pub trait Telemetry {
    fn is_logging(&self) -> bool;
    fn log_performance(&mut self, sample: &PerformanceSample);
    /// Housekeeping hook, called once per tick after logging.
    fn process(&mut self) {}
}

/// Telemetry disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelemetry;

impl Telemetry for NoTelemetry {
    #[inline]
    fn is_logging(&self) -> bool {
        false
    }

    #[inline]
    fn log_performance(&mut self, _sample: &PerformanceSample) {}
}

impl<T: Telemetry + ?Sized> Telemetry for Box<T> {
    fn is_logging(&self) -> bool {
        (**self).is_logging()
    }
    fn log_performance(&mut self, sample: &PerformanceSample) {
        (**self).log_performance(sample);
    }
    fn process(&mut self) {
        (**self).process();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_profile_returns_defaults() {
        let p = NoProfile;
        assert_eq!(p.speed_value(180), 180);
        assert_eq!(p.kp(5.0), 5.0);
        assert_eq!(p.kd(600.0), 600.0);
        assert_eq!(p.filter_coefficient(0.6), 0.6);
    }

    #[test]
    fn flag_bits_are_distinct() {
        assert_eq!(FLAG_PRECISION_MODE, 0b01);
        assert_eq!(FLAG_TURNING, 0b10);
    }
}
