//! Track-feature detection from the two marker sensors.
//!
//! The pair is sampled at a fixed cadence and packed into a [`MarkerState`].
//! Only *changes* of that state are recorded, in a four-deep history; lap,
//! mode and intersection markers are recognised from the shape of that
//! history, which also rejects single-sample glitches.

use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tracer_traits::{Clock, MarkerReading, MarkerSensors};

use crate::config::MarkerCfg;
use crate::error::Result;
use crate::hw_error::map_hw_error;
use crate::timer::Deadline;

/// Packed marker-pair state. The right channel drives bit 0 and the left
/// channel bit 1; the variant names are the track-side marker codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkerState {
    #[default]
    None = 0,
    LeftOnly = 1,
    RightOnly = 2,
    Both = 3,
}

impl MarkerState {
    /// Decode the two low bits; higher bits are ignored.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => MarkerState::None,
            1 => MarkerState::LeftOnly,
            2 => MarkerState::RightOnly,
            _ => MarkerState::Both,
        }
    }

    /// Pack per-channel detections.
    #[inline]
    pub fn from_detections(left: bool, right: bool) -> Self {
        Self::from_bits(u8::from(right) | (u8::from(left) << 1))
    }

    /// Pack a raw reading: a channel detects when it reads below `threshold`.
    #[inline]
    pub fn from_reading(reading: MarkerReading, threshold: u16) -> Self {
        Self::from_detections(reading.left < threshold, reading.right < threshold)
    }

    #[inline]
    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// Shift register of the most recent distinct marker states, newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerHistory {
    pub current: MarkerState,
    pub last: MarkerState,
    pub previous: MarkerState,
    pub old: MarkerState,
}

impl MarkerHistory {
    /// `old <- previous <- last <- current <- next`.
    pub fn push(&mut self, next: MarkerState) {
        self.old = self.previous;
        self.previous = self.last;
        self.last = self.current;
        self.current = next;
    }

    /// Recognise a track feature from the history right after a change was
    /// pushed, so a pattern reports on the read that completes it. Rules are
    /// checked in priority order and only the first match is reported.
    pub fn classify(&self) -> Option<MarkerEvent> {
        use MarkerState::*;
        if self.current == None && self.last == RightOnly && self.previous == None {
            return Some(MarkerEvent::FinishLine);
        }
        if self.current == None && self.last == LeftOnly && self.previous == None {
            return Some(MarkerEvent::ModeToggle);
        }
        if [self.last, self.previous, self.old].contains(&Both) {
            return Some(MarkerEvent::Intersection);
        }
        Option::None
    }
}

/// Track feature recognised on a marker-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerEvent {
    /// Start/finish line crossed.
    FinishLine,
    /// Precision-mode marker crossed.
    ModeToggle,
    /// Both sensors saw tape recently; informational only.
    Intersection,
}

pub struct MarkerMachine {
    cfg: MarkerCfg,
    history: MarkerHistory,
    sample_timer: Deadline,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl core::fmt::Debug for MarkerMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MarkerMachine")
            .field("history", &self.history)
            .finish()
    }
}

impl MarkerMachine {
    pub fn new(cfg: MarkerCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            cfg,
            history: MarkerHistory::default(),
            sample_timer: Deadline::new(clock.clone()),
            clock,
        }
    }

    pub fn history(&self) -> &MarkerHistory {
        &self.history
    }

    /// Clear the history and allow an immediate sample. Call at run start.
    pub fn reset(&mut self) {
        self.history = MarkerHistory::default();
        self.sample_timer = Deadline::new(self.clock.clone());
    }

    /// Sample the sensors if the read interval has elapsed and feed the result
    /// to [`observe`](Self::observe). Within the interval this is a no-op.
    pub fn poll<K: MarkerSensors + ?Sized>(&mut self, sensors: &mut K) -> Result<Option<MarkerEvent>> {
        if !self.sample_timer.expired() {
            return Ok(None);
        }
        self.sample_timer
            .start(Duration::from_millis(self.cfg.read_interval_ms));
        let reading = sensors
            .read()
            .map_err(|e| eyre::Report::new(map_hw_error(&*e)))
            .wrap_err("reading marker sensors")?;
        Ok(self.observe(reading))
    }

    /// Process one reading. An unchanged state returns at once; a change is
    /// pushed onto the history, which is then classified.
    pub fn observe(&mut self, reading: MarkerReading) -> Option<MarkerEvent> {
        let state = MarkerState::from_reading(reading, self.cfg.threshold);
        self.observe_state(state)
    }

    pub fn observe_state(&mut self, state: MarkerState) -> Option<MarkerEvent> {
        if state == self.history.current {
            return None;
        }
        self.history.push(state);
        let event = self.history.classify();
        tracing::trace!(state = state.bits(), ?event, "marker state change");
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tracer_traits::ManualClock;
    use MarkerState::*;

    fn machine() -> (ManualClock, MarkerMachine) {
        let clock = ManualClock::new();
        let m = MarkerMachine::new(MarkerCfg::default(), Arc::new(clock.clone()));
        (clock, m)
    }

    fn feed(m: &mut MarkerMachine, states: &[MarkerState]) -> Vec<MarkerEvent> {
        states.iter().filter_map(|&s| m.observe_state(s)).collect()
    }

    #[rstest]
    #[case(false, false, None)]
    #[case(false, true, LeftOnly)]
    #[case(true, false, RightOnly)]
    #[case(true, true, Both)]
    fn packing_puts_right_in_bit0(#[case] left: bool, #[case] right: bool, #[case] want: MarkerState) {
        assert_eq!(MarkerState::from_detections(left, right), want);
    }

    #[test]
    fn from_bits_round_trips_and_masks() {
        for b in 0..4u8 {
            assert_eq!(MarkerState::from_bits(b).bits(), b);
        }
        assert_eq!(MarkerState::from_bits(0b110), RightOnly);
    }

    #[test]
    fn reading_below_threshold_detects() {
        let r = MarkerReading { left: 100, right: 800 };
        assert_eq!(MarkerState::from_reading(r, 600), RightOnly);
        let r = MarkerReading { left: 600, right: 599 };
        assert_eq!(MarkerState::from_reading(r, 600), LeftOnly);
    }

    #[test]
    fn repeated_identical_readings_do_nothing() {
        let (_c, mut m) = machine();
        m.observe_state(RightOnly);
        let before = *m.history();
        for _ in 0..100 {
            assert_eq!(m.observe_state(RightOnly), Option::None);
        }
        assert_eq!(*m.history(), before);
    }

    #[test]
    fn change_shifts_history_once() {
        let (_c, mut m) = machine();
        feed(&mut m, &[LeftOnly, RightOnly, Both]);
        let h = *m.history();
        m.observe_state(None);
        let after = *m.history();
        assert_eq!(after.current, None);
        assert_eq!(after.last, h.current);
        assert_eq!(after.previous, h.last);
        assert_eq!(after.old, h.previous);
    }

    #[test]
    fn finish_line_fires_on_the_read_completing_none_right_none() {
        let (_c, mut m) = machine();
        assert_eq!(feed(&mut m, &[RightOnly, None, None]), vec![MarkerEvent::FinishLine]);
        assert_eq!(
            *m.history(),
            MarkerHistory {
                current: None,
                last: RightOnly,
                previous: None,
                old: None
            }
        );
        // The pattern shifts out on the next change; nothing repeats.
        assert!(feed(&mut m, &[LeftOnly, LeftOnly]).is_empty());
    }

    #[test]
    fn duplicate_reads_inside_the_pattern_are_absorbed() {
        let (_c, mut m) = machine();
        let events = feed(&mut m, &[None, RightOnly, RightOnly, RightOnly, None, None, None]);
        assert_eq!(events, vec![MarkerEvent::FinishLine]);
    }

    #[test]
    fn mode_toggle_fires_on_the_read_completing_none_left_none() {
        let (_c, mut m) = machine();
        assert_eq!(feed(&mut m, &[LeftOnly, None, None]), vec![MarkerEvent::ModeToggle]);
        assert!(feed(&mut m, &[RightOnly]).is_empty());
    }

    #[test]
    fn intersection_while_both_in_recent_history() {
        let (_c, mut m) = machine();
        assert!(feed(&mut m, &[Both]).is_empty());
        // Both shifts through last, previous and old.
        assert_eq!(
            feed(&mut m, &[None, LeftOnly, RightOnly]),
            vec![MarkerEvent::Intersection; 3]
        );
        assert!(feed(&mut m, &[LeftOnly]).is_empty());
    }

    #[test]
    fn finish_after_crossing_wins_over_intersection() {
        let (_c, mut m) = machine();
        // Both still sits in `old` when the lap pattern completes.
        let events = feed(&mut m, &[Both, None, RightOnly, None]);
        assert_eq!(
            events,
            vec![
                MarkerEvent::Intersection,
                MarkerEvent::Intersection,
                MarkerEvent::FinishLine
            ]
        );
    }

    #[test]
    fn finish_takes_priority_over_stale_both() {
        let mut h = MarkerHistory {
            current: None,
            last: RightOnly,
            previous: None,
            old: Both,
        };
        assert_eq!(h.classify(), Some(MarkerEvent::FinishLine));
        h.last = LeftOnly;
        assert_eq!(h.classify(), Some(MarkerEvent::ModeToggle));
        h.last = Both;
        assert_eq!(h.classify(), Some(MarkerEvent::Intersection));
    }

    #[test]
    fn single_glitch_is_absorbed() {
        let (_c, mut m) = machine();
        // RightOnly glitch surrounded by LeftOnly: pattern never matches.
        let events = feed(&mut m, &[LeftOnly, RightOnly, LeftOnly, None]);
        assert!(events.is_empty(), "{events:?}");
    }

    struct Scripted {
        readings: Vec<MarkerReading>,
        reads: usize,
    }

    impl MarkerSensors for Scripted {
        fn read(&mut self) -> std::result::Result<MarkerReading, Box<dyn std::error::Error + Send + Sync>> {
            let r = self.readings[self.reads.min(self.readings.len() - 1)];
            self.reads += 1;
            Ok(r)
        }
    }

    #[test]
    fn poll_respects_read_interval() {
        let (clock, mut m) = machine();
        let mut s = Scripted {
            readings: vec![MarkerReading { left: 900, right: 900 }],
            reads: 0,
        };
        m.poll(&mut s).unwrap();
        assert_eq!(s.reads, 1);
        clock.advance(Duration::from_millis(1));
        m.poll(&mut s).unwrap();
        assert_eq!(s.reads, 1, "second poll within 2 ms must not sample");
        clock.advance(Duration::from_millis(1));
        m.poll(&mut s).unwrap();
        assert_eq!(s.reads, 2);
    }

    #[test]
    fn reset_clears_history() {
        let (_c, mut m) = machine();
        feed(&mut m, &[Both, LeftOnly]);
        m.reset();
        assert_eq!(*m.history(), MarkerHistory::default());
    }

    #[test]
    fn reset_allows_an_immediate_sample() {
        let (_c, mut m) = machine();
        let mut s = Scripted {
            readings: vec![MarkerReading { left: 900, right: 900 }],
            reads: 0,
        };
        m.poll(&mut s).unwrap();
        m.reset();
        m.poll(&mut s).unwrap();
        assert_eq!(s.reads, 2);
    }
}
