//! Drive status returned from each control loop iteration.

/// Public status of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    /// Still following the line.
    Running,
    /// Stop sequence completed; motors are at zero and stay there.
    Stopped,
}
