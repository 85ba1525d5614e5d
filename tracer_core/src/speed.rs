//! Speed control law: turn / straight / transition blending, post-turn boost,
//! and a rate-limited ramp.

use crate::config::SpeedCfg;

/// Motion flags and the ramped speed. Reset wholesale on a mode toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionState {
    pub is_turning: bool,
    pub is_exiting_turn: bool,
    pub boost_countdown: u32,
    pub is_precision_mode: bool,
    pub current_speed: i32,
}

#[derive(Debug, Clone)]
pub struct SpeedController {
    cfg: SpeedCfg,
    state: MotionState,
}

impl SpeedController {
    pub fn new(cfg: SpeedCfg) -> Self {
        Self {
            cfg,
            state: MotionState::default(),
        }
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    pub fn cfg(&self) -> &SpeedCfg {
        &self.cfg
    }

    /// Straight-line speed for the current mode.
    #[inline]
    pub fn baseline(&self) -> i32 {
        if self.state.is_precision_mode {
            self.cfg.slow_speed
        } else {
            self.cfg.fast_speed
        }
    }

    /// Upper bound of the final clamp. Normal mode keeps headroom for boost.
    #[inline]
    pub fn ceiling(&self) -> i32 {
        if self.state.is_precision_mode {
            self.cfg.slow_speed
        } else {
            self.cfg.max_speed
        }
    }

    /// Derive this tick's speed from the steering error.
    pub fn update(&mut self, error: i32) -> i32 {
        let magnitude = error.saturating_abs();
        let mut just_exited = false;

        let target = if magnitude > self.cfg.turn_threshold {
            self.state.is_turning = true;
            self.state.is_exiting_turn = false;
            self.state.current_speed = self.cfg.turn_speed;
            return self.cfg.turn_speed;
        } else if magnitude < self.cfg.straight_threshold {
            if self.state.is_turning {
                self.state.is_exiting_turn = true;
                self.state.boost_countdown = self.cfg.boost_ticks;
                just_exited = true;
                tracing::trace!(boost_ticks = self.cfg.boost_ticks, "turn exit");
            }
            self.state.is_turning = false;
            self.baseline()
        } else {
            self.interpolate(magnitude)
        };

        let target = if just_exited { target } else { self.apply_boost(target) };
        let ramped = self.ramp_toward(target);
        self.state.current_speed = ramped.clamp(self.cfg.turn_speed, self.ceiling());
        self.state.current_speed
    }

    /// Lower `current_speed` to at most `limit`.
    pub fn cap(&mut self, limit: i32) -> i32 {
        self.state.current_speed = self.state.current_speed.min(limit);
        self.state.current_speed
    }

    /// Force the speed to zero. Used once the vehicle has stopped.
    pub fn halt(&mut self) {
        self.state.current_speed = 0;
    }

    /// Flip precision mode and reset every motion flag.
    pub fn toggle_mode(&mut self) {
        self.state.is_precision_mode = !self.state.is_precision_mode;
        self.state.current_speed = self.baseline();
        self.state.is_turning = false;
        self.state.is_exiting_turn = false;
        self.state.boost_countdown = 0;
        tracing::debug!(
            precision = self.state.is_precision_mode,
            speed = self.state.current_speed,
            "mode toggled"
        );
    }

    /// Back to normal mode at standstill.
    pub fn reset(&mut self) {
        self.state = MotionState::default();
    }

    fn interpolate(&self, magnitude: i32) -> i32 {
        let span = self.cfg.turn_threshold - self.cfg.straight_threshold;
        if span <= 0 {
            return self.baseline();
        }
        let base = self.baseline();
        let offset = magnitude - self.cfg.straight_threshold;
        base + (self.cfg.turn_speed - base) * offset / span
    }

    fn apply_boost(&mut self, target: i32) -> i32 {
        if !self.state.is_exiting_turn
            || self.state.boost_countdown == 0
            || self.state.is_precision_mode
        {
            return target;
        }
        self.state.boost_countdown -= 1;
        if self.state.boost_countdown == 0 {
            self.state.is_exiting_turn = false;
        }
        target
            .saturating_add(self.cfg.boost_increment)
            .min(self.cfg.max_speed)
    }

    fn ramp_toward(&self, target: i32) -> i32 {
        let current = self.state.current_speed;
        let diff = target - current;
        let step = if diff > 0 {
            self.cfg.accel_step
        } else {
            self.cfg.brake_step
        };
        if diff.abs() <= step {
            target
        } else {
            current + diff.signum() * step
        }
    }
}
