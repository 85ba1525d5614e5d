pub mod clock;
pub mod diag;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use diag::{NoProfile, NoTelemetry, PerformanceSample, ProfileSource, Telemetry};

/// Number of reflectance channels in the line array.
pub const LINE_SENSOR_COUNT: usize = 6;

/// Raw reflectance values of the line array, ordered left to right.
/// Lower values mean a darker surface.
pub type SensorSnapshot = [u16; LINE_SENSOR_COUNT];

/// Raw values of the two marker channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerReading {
    pub left: u16,
    pub right: u16,
}

pub trait LineSensors {
    /// Read all six channels as one snapshot.
    fn read(&mut self) -> Result<SensorSnapshot, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait MarkerSensors {
    fn read(&mut self) -> Result<MarkerReading, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait Motors {
    /// Drive both wheels. Inputs are already clamped to `[-255, 255]`;
    /// the sign selects direction, the magnitude the duty cycle.
    fn set_power(
        &mut self,
        left: i32,
        right: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: LineSensors + ?Sized> LineSensors for Box<T> {
    fn read(&mut self) -> Result<SensorSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read()
    }
}

impl<T: MarkerSensors + ?Sized> MarkerSensors for Box<T> {
    fn read(&mut self) -> Result<MarkerReading, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read()
    }
}

impl<T: Motors + ?Sized> Motors for Box<T> {
    fn set_power(
        &mut self,
        left: i32,
        right: i32,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_power(left, right)
    }
}
