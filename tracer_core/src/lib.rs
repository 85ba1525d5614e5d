#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Navigation core of a line-following vehicle (hardware-agnostic).
//!
//! All hardware interactions go through the `tracer_traits::LineSensors`,
//! `MarkerSensors` and `Motors` traits; time goes through `Clock`.
//!
//! ## Architecture
//!
//! - **Timing**: non-blocking deadline timer (`timer`)
//! - **Position**: calibration and weighted line position with line-loss
//!   fallback (`estimator`)
//! - **Markers**: change-driven history of the marker pair raising finish,
//!   mode and intersection events (`marker`)
//! - **Speed**: turn/straight blending, post-turn boost, ramp (`speed`)
//! - **Steering**: filtered PD correction and differential mix (`steering`)
//! - **Stop**: two-phase end-of-run sequence (`stop`)
//! - **Pipeline**: one tick through all of the above (`NavigatorCore`)
//!
//! A tick never fails because of what the sensors saw; only collaborator I/O
//! errors surface, as `eyre` reports carrying a typed `TracerError`.

pub mod builder;
pub mod config;
pub mod conversions;
pub mod core;
pub mod error;
pub mod estimator;
pub mod hw_error;
pub mod marker;
pub mod mocks;
pub mod runner;
pub mod sampler;
pub mod speed;
pub mod status;
pub mod steering;
pub mod stop;
pub mod telemetry;
pub mod timer;
pub mod util;

pub use builder::{Missing, Navigator, NavigatorBuilder, NavigatorG, Set, build_navigator};
pub use config::{EstimatorCfg, LoopCfg, MarkerCfg, NavigatorCfg, SpeedCfg, SteeringCfg, StopCfg};
pub use crate::core::NavigatorCore;
pub use error::{AbortReason, BuildError, Result, TracerError};
pub use estimator::{CalibrationTable, PositionEstimator, PositionSample};
pub use marker::{MarkerEvent, MarkerHistory, MarkerMachine, MarkerState};
pub use runner::{RunParams, RunSummary, SamplingMode};
pub use speed::{MotionState, SpeedController};
pub use status::DriveStatus;
pub use steering::{MotorCommand, PidState, SteeringController, mix};
pub use stop::{StopPhase, StopSequencer};
pub use telemetry::TracingTelemetry;
pub use timer::Deadline;

/// Largest magnitude the motor collaborator accepts.
pub const MAX_POWER: i32 = 255;
