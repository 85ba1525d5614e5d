//! Test and helper mocks for tracer_core

use tracer_traits::{LineSensors, SensorSnapshot};

/// Line sensors that always error on read; useful when driving the control
/// loop with externally sampled snapshots via `step_with_snapshot`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLineSensors;

impl LineSensors for NoopLineSensors {
    fn read(&mut self) -> Result<SensorSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("noop line sensors")))
    }
}
