use thiserror::Error;

/// Why a run loop gave up before the stop sequence latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Wall-clock cap reached.
    MaxRuntime,
    /// Operator asked to stop (signal, shutdown flag).
    Shutdown,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::MaxRuntime => f.write_str("max run time exceeded"),
            AbortReason::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum TracerError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("aborted: {0}")]
    Abort(AbortReason),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing line sensors")]
    MissingLineSensors,
    #[error("missing marker sensors")]
    MissingMarkerSensors,
    #[error("missing motors")]
    MissingMotors,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
