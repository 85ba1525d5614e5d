//! `Telemetry` sink that forwards decimated samples to `tracing`.

use tracer_traits::{PerformanceSample, Telemetry};

/// Emits one `trace!` event every `every_n` ticks under the
/// `tracer::telemetry` target.
#[derive(Debug, Clone)]
pub struct TracingTelemetry {
    every_n: u32,
    seen: u32,
    emitted: u64,
}

impl TracingTelemetry {
    pub fn new(every_n: u32) -> Self {
        Self {
            every_n: every_n.max(1),
            seen: 0,
            emitted: 0,
        }
    }

    /// Samples forwarded so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Telemetry for TracingTelemetry {
    fn is_logging(&self) -> bool {
        true
    }

    fn log_performance(&mut self, s: &PerformanceSample) {
        self.seen += 1;
        if self.seen < self.every_n {
            return;
        }
        self.seen = 0;
        self.emitted += 1;
        tracing::trace!(
            target: "tracer::telemetry",
            position = s.position,
            error = s.error,
            correction = s.correction,
            left = s.left_power,
            right = s.right_power,
            flags = s.state_flags,
        );
    }
}
