//! Non-blocking deadline timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracer_traits::Clock;

/// Interval primitive used by every time-gated operation.
///
/// `start(d)` records `deadline = now + d`; `expired()` turns true once
/// `now >= deadline` and stays true until the next `start`. A timer that was
/// never started reports expired. There is no cancel: restart it or stop
/// asking.
#[derive(Clone)]
pub struct Deadline {
    clock: Arc<dyn Clock + Send + Sync>,
    deadline: Option<Instant>,
}

impl core::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Deadline")
            .field("remaining_ms", &self.remaining().as_millis())
            .finish()
    }
}

impl Deadline {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            deadline: None,
        }
    }

    pub fn start(&mut self, d: Duration) {
        self.deadline = Some(self.clock.now() + d);
    }

    pub fn expired(&self) -> bool {
        match self.deadline {
            None => true,
            Some(at) => self.clock.now() >= at,
        }
    }

    /// Time left until expiry; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .map(|at| at.saturating_duration_since(self.clock.now()))
            .unwrap_or(Duration::ZERO)
    }
}
