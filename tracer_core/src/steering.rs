//! PD steering with a filtered derivative, and differential output mixing.

use crate::config::SteeringCfg;
use crate::util::clamp_power;

/// Derivative state carried between ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidState {
    pub previous_error: i32,
    pub filtered_rate: f32,
}

/// Left/right motor power, each within `[-MAX_POWER, MAX_POWER]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorCommand {
    pub left: i32,
    pub right: i32,
}

impl MotorCommand {
    pub const STOP: Self = Self { left: 0, right: 0 };
}

/// Symmetric differential mix: `speed ± correction`, rounded and clamped.
pub fn mix(speed: i32, correction: f32) -> MotorCommand {
    let base = speed as f32;
    MotorCommand {
        left: clamp_power(round_to_i32(base + correction)),
        right: clamp_power(round_to_i32(base - correction)),
    }
}

#[inline]
fn round_to_i32(x: f32) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    // Saturating float-to-int cast.
    x.round() as i32
}

#[derive(Debug, Clone)]
pub struct SteeringController {
    cfg: SteeringCfg,
    state: PidState,
}

impl SteeringController {
    pub fn new(cfg: SteeringCfg) -> Self {
        Self {
            cfg,
            state: PidState::default(),
        }
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn cfg(&self) -> &SteeringCfg {
        &self.cfg
    }

    /// Compute the correction for `error` at `base_speed` and advance the
    /// derivative state.
    pub fn correction(&mut self, error: i32, base_speed: i32) -> f32 {
        let alpha = self.cfg.filter_alpha;
        let rate = (error - self.state.previous_error) as f32;
        self.state.filtered_rate = alpha * rate + (1.0 - alpha) * self.state.filtered_rate;

        let mut c = self.cfg.kp * error as f32 + self.cfg.kd * self.state.filtered_rate;
        if base_speed > self.cfg.high_speed_threshold {
            c *= self.cfg.high_speed_attenuation;
        }
        self.state.previous_error = error;
        c
    }

    /// Correction followed by [`mix`].
    pub fn command(&mut self, error: i32, base_speed: i32) -> (f32, MotorCommand) {
        let c = self.correction(error, base_speed);
        (c, mix(base_speed, c))
    }

    pub fn reset(&mut self) {
        self.state = PidState::default();
    }
}
