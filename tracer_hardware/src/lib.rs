//! Backends for the navigation core: a deterministic track simulation that is
//! always available, and Raspberry Pi drivers behind the `hardware` feature.

pub mod error;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod sim;

pub use error::HwError;
pub use sim::{
    MarkerKind, Pose, Segment, Sim, SimLineSensors, SimMarkerSensors, SimMotors, SimState,
    SimTrack, TrackMarker, VehicleParams,
};
