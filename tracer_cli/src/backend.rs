//! Hardware assembly: the Raspberry Pi backend behind the `hardware` feature,
//! the simulated oval otherwise.

use std::sync::Arc;

use tracer_traits::{Clock, LineSensors, MarkerSensors, Motors};

/// Inject a line sensor fault into the simulated backend (test hook).
#[cfg(not(feature = "hardware"))]
const SIM_FAULT_ENV: &str = "TRACER_TEST_SIM_FAULT";

/// Collaborators for one command, boxed so the CLI has one code path.
pub struct Backend {
    pub line: Box<dyn LineSensors + Send>,
    pub markers: Box<dyn MarkerSensors>,
    pub motors: Box<dyn Motors>,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub name: &'static str,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("name", &self.name).finish()
    }
}

#[cfg(feature = "hardware")]
pub fn make_backend(cfg: &tracer_config::Config) -> eyre::Result<Backend> {
    use eyre::WrapErr;
    use std::sync::Mutex;
    use tracer_hardware::hardware::{AdcLineSensors, AdcMarkerSensors, Mcp3008, PwmMotors};
    use tracer_traits::MonotonicClock;

    let p = &cfg.pins;
    let adc = Mcp3008::new(p.spi_bus, p.spi_slave_select, p.spi_clock_hz)
        .wrap_err("open mcp3008")?;
    let adc = Arc::new(Mutex::new(adc));
    let motors = PwmMotors::new(p.pwm_left, p.pwm_right, p.dir_left, p.dir_right, p.pwm_frequency_hz)
        .wrap_err("open motor pins")?;
    tracing::info!(
        spi_bus = p.spi_bus,
        pwm_hz = p.pwm_frequency_hz,
        "hardware backend ready"
    );
    Ok(Backend {
        line: Box::new(AdcLineSensors::new(adc.clone(), p.line_channels)),
        markers: Box::new(AdcMarkerSensors::new(
            adc,
            p.marker_left_channel,
            p.marker_right_channel,
        )),
        motors: Box::new(motors),
        clock: Arc::new(MonotonicClock::new()),
        name: "hardware",
    })
}

/// Simulated oval driven by a manual clock, so a run completes as fast as
/// the CPU allows while the loop still sees its nominal tick period.
#[cfg(not(feature = "hardware"))]
pub fn make_backend(_cfg: &tracer_config::Config) -> eyre::Result<Backend> {
    use tracer_hardware::{Sim, SimTrack};
    use tracer_traits::ManualClock;

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(ManualClock::new());
    let track = SimTrack::oval();
    let track_mm = track.length_mm();
    let sim = Sim::new(track, clock.clone());
    let line: Box<dyn LineSensors + Send> = match std::env::var(SIM_FAULT_ENV).as_deref() {
        Ok("line") => {
            tracing::warn!("sim line sensors will fail with a timeout");
            Box::new(FailingLineSensors)
        }
        _ => Box::new(sim.line_sensors()),
    };
    tracing::debug!(track_mm, "sim backend ready");
    Ok(Backend {
        line,
        markers: Box::new(sim.marker_sensors()),
        motors: Box::new(sim.motors()),
        clock,
        name: "sim",
    })
}

/// Line sensors whose every read times out.
#[cfg(not(feature = "hardware"))]
struct FailingLineSensors;

#[cfg(not(feature = "hardware"))]
impl LineSensors for FailingLineSensors {
    fn read(
        &mut self,
    ) -> Result<tracer_traits::SensorSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(tracer_hardware::HwError::Timeout))
    }
}
