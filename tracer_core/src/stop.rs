//! Two-phase end-of-run stop: a short brake window, then a motor cut.

use std::sync::Arc;
use std::time::Duration;

use tracer_traits::Clock;

use crate::config::StopCfg;
use crate::timer::Deadline;

/// Strictly forward: `Running -> Slowing -> Stopped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopPhase {
    #[default]
    Running,
    Slowing,
    Stopped,
}

pub struct StopSequencer {
    cfg: StopCfg,
    lap_target: u32,
    lap_count: u32,
    phase: StopPhase,
    slowdown: Deadline,
    stop: Deadline,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl core::fmt::Debug for StopSequencer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StopSequencer")
            .field("lap_count", &self.lap_count)
            .field("lap_target", &self.lap_target)
            .field("phase", &self.phase)
            .field("slowdown", &self.slowdown)
            .field("stop", &self.stop)
            .finish()
    }
}

impl StopSequencer {
    pub fn new(cfg: StopCfg, lap_target: u32, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            cfg,
            lap_target,
            lap_count: 0,
            phase: StopPhase::Running,
            slowdown: Deadline::new(clock.clone()),
            stop: Deadline::new(clock.clone()),
            clock,
        }
    }

    pub fn phase(&self) -> StopPhase {
        self.phase
    }

    pub fn lap_count(&self) -> u32 {
        self.lap_count
    }

    pub fn is_stop_sequence_active(&self) -> bool {
        self.phase != StopPhase::Running
    }

    pub fn is_robot_stopped(&self) -> bool {
        self.phase == StopPhase::Stopped
    }

    /// Count a finish-line crossing. Arms the sequence once the lap target is
    /// reached; later crossings only bump the counter. Returns `true` on the
    /// crossing that armed it.
    pub fn record_finish(&mut self) -> bool {
        self.lap_count = self.lap_count.saturating_add(1);
        tracing::info!(lap = self.lap_count, target = self.lap_target, "finish line");
        if self.lap_count < self.lap_target || self.phase != StopPhase::Running {
            return false;
        }
        self.phase = StopPhase::Slowing;
        self.slowdown
            .start(Duration::from_millis(self.cfg.slowdown_ms));
        self.stop.start(Duration::from_millis(self.cfg.stop_ms));
        tracing::info!(
            slowdown_ms = self.cfg.slowdown_ms,
            stop_ms = self.cfg.stop_ms,
            "stop sequence armed"
        );
        true
    }

    /// Latch `Stopped` once the stop timer has expired.
    pub fn advance(&mut self) -> StopPhase {
        if self.phase == StopPhase::Slowing && self.stop.expired() {
            self.phase = StopPhase::Stopped;
            tracing::info!(laps = self.lap_count, "vehicle stopped");
        }
        self.phase
    }

    /// Speed cap while the brake window is open.
    pub fn speed_limit(&self) -> Option<i32> {
        (self.phase == StopPhase::Slowing && !self.slowdown.expired())
            .then_some(self.cfg.brake_speed)
    }

    /// Start of a new run.
    pub fn reset(&mut self) {
        self.lap_count = 0;
        self.phase = StopPhase::Running;
        self.slowdown = Deadline::new(self.clock.clone());
        self.stop = Deadline::new(self.clock.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_traits::ManualClock;

    fn seq(lap_target: u32) -> (ManualClock, StopSequencer) {
        let clock = ManualClock::new();
        let s = StopSequencer::new(StopCfg::default(), lap_target, Arc::new(clock.clone()));
        (clock, s)
    }

    #[test]
    fn arms_on_second_finish_only() {
        let (_c, mut s) = seq(2);
        assert!(!s.record_finish());
        assert!(!s.is_stop_sequence_active());
        assert!(s.record_finish());
        assert!(s.is_stop_sequence_active());
        assert_eq!(s.phase(), StopPhase::Slowing);
    }

    #[test]
    fn third_finish_does_not_rearm_timers() {
        let (c, mut s) = seq(2);
        s.record_finish();
        s.record_finish();
        c.advance(Duration::from_millis(200));
        assert!(!s.record_finish());
        assert_eq!(s.lap_count(), 3);
        // Original stop deadline (300 ms) still governs.
        c.advance(Duration::from_millis(100));
        assert_eq!(s.advance(), StopPhase::Stopped);
    }

    #[test]
    fn brake_window_then_stop() {
        let (c, mut s) = seq(1);
        assert_eq!(s.speed_limit(), None);
        s.record_finish();
        assert_eq!(s.speed_limit(), Some(60));
        c.advance(Duration::from_millis(49));
        assert_eq!(s.speed_limit(), Some(60));
        c.advance(Duration::from_millis(1));
        assert_eq!(s.speed_limit(), None);
        assert_eq!(s.advance(), StopPhase::Slowing);
        c.advance(Duration::from_millis(250));
        assert_eq!(s.advance(), StopPhase::Stopped);
        assert!(s.is_robot_stopped());
    }

    #[test]
    fn stopped_is_terminal() {
        let (c, mut s) = seq(1);
        s.record_finish();
        c.advance(Duration::from_millis(300));
        s.advance();
        for _ in 0..5 {
            s.record_finish();
            c.advance(Duration::from_secs(1));
            assert_eq!(s.advance(), StopPhase::Stopped);
            assert_eq!(s.speed_limit(), None);
        }
    }

    #[test]
    fn phases_are_ordered() {
        assert!(StopPhase::Running < StopPhase::Slowing);
        assert!(StopPhase::Slowing < StopPhase::Stopped);
    }

    #[test]
    fn reset_returns_to_running() {
        let (_c, mut s) = seq(1);
        s.record_finish();
        s.reset();
        assert_eq!(s.phase(), StopPhase::Running);
        assert_eq!(s.lap_count(), 0);
        assert_eq!(s.speed_limit(), None);
    }

    #[test]
    fn rearm_after_reset_gets_fresh_timers() {
        let (c, mut s) = seq(1);
        s.record_finish();
        c.advance(Duration::from_millis(200));
        s.reset();
        assert_eq!(s.advance(), StopPhase::Running);
        s.record_finish();
        c.advance(Duration::from_millis(299));
        assert_eq!(s.advance(), StopPhase::Slowing);
        c.advance(Duration::from_millis(1));
        assert_eq!(s.advance(), StopPhase::Stopped);
    }
}
