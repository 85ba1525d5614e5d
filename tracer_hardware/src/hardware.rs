//! Raspberry Pi backends: MCP3008 ADC over SPI for the reflectance channels,
//! hardware PWM plus direction GPIOs for the two motors.

use std::sync::{Arc, Mutex, MutexGuard};

use rppal::gpio::{Gpio, OutputPin};
use rppal::pwm::{Channel, Polarity, Pwm};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracer_traits::{LINE_SENSOR_COUNT, LineSensors, MarkerReading, MarkerSensors, Motors, SensorSnapshot};

use crate::error::{HwError, Result};

/// 10-bit, 8-channel SPI ADC.
pub struct Mcp3008 {
    spi: Spi,
}

impl Mcp3008 {
    pub fn new(bus: u8, slave_select: u8, clock_hz: u32) -> Result<Self> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(HwError::Spi(format!("unsupported bus {other}"))),
        };
        let ss = match slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => return Err(HwError::Spi(format!("unsupported slave select {other}"))),
        };
        let spi = Spi::new(bus, ss, clock_hz, Mode::Mode0).map_err(|e| HwError::Spi(e.to_string()))?;
        tracing::info!(clock_hz, "mcp3008 opened");
        Ok(Self { spi })
    }

    /// Single-ended conversion of `channel` (0..=7).
    pub fn read(&mut self, channel: u8) -> Result<u16> {
        if channel > 7 {
            return Err(HwError::Channel(channel));
        }
        let tx = [0x01, (0x08 | channel) << 4, 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        let raw = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
        tracing::trace!(channel, raw, "mcp3008 sample");
        Ok(raw)
    }
}

/// One ADC shared by the line and marker channels.
pub type SharedAdc = Arc<Mutex<Mcp3008>>;

fn lock(adc: &SharedAdc) -> Result<MutexGuard<'_, Mcp3008>> {
    adc.lock().map_err(|_| HwError::Spi("adc lock poisoned".into()))
}

pub struct AdcLineSensors {
    adc: SharedAdc,
    channels: [u8; LINE_SENSOR_COUNT],
}

impl AdcLineSensors {
    pub fn new(adc: SharedAdc, channels: [u8; LINE_SENSOR_COUNT]) -> Self {
        Self { adc, channels }
    }
}

impl LineSensors for AdcLineSensors {
    fn read(&mut self) -> std::result::Result<SensorSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        // Hold the lock for the whole sweep so the snapshot is one pass.
        let mut adc = lock(&self.adc)?;
        let mut out = [0u16; LINE_SENSOR_COUNT];
        for (raw, &ch) in out.iter_mut().zip(self.channels.iter()) {
            *raw = adc.read(ch)?;
        }
        Ok(out)
    }
}

pub struct AdcMarkerSensors {
    adc: SharedAdc,
    left: u8,
    right: u8,
}

impl AdcMarkerSensors {
    pub fn new(adc: SharedAdc, left: u8, right: u8) -> Self {
        Self { adc, left, right }
    }
}

impl MarkerSensors for AdcMarkerSensors {
    fn read(&mut self) -> std::result::Result<MarkerReading, Box<dyn std::error::Error + Send + Sync>> {
        let mut adc = lock(&self.adc)?;
        Ok(MarkerReading {
            left: adc.read(self.left)?,
            right: adc.read(self.right)?,
        })
    }
}

fn pwm_channel(n: u8) -> Result<Channel> {
    match n {
        0 => Ok(Channel::Pwm0),
        1 => Ok(Channel::Pwm1),
        other => Err(HwError::Pwm(format!("unsupported pwm channel {other}"))),
    }
}

struct Wheel {
    pwm: Pwm,
    dir: OutputPin,
}

impl Wheel {
    fn new(gpio: &Gpio, channel: u8, dir_pin: u8, frequency_hz: f64) -> Result<Self> {
        let pwm = Pwm::with_frequency(pwm_channel(channel)?, frequency_hz, 0.0, Polarity::Normal, true)
            .map_err(|e| HwError::Pwm(e.to_string()))?;
        let dir = gpio
            .get(dir_pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_output_low();
        Ok(Self { pwm, dir })
    }

    fn drive(&mut self, power: i32) -> Result<()> {
        if power < 0 {
            self.dir.set_high();
        } else {
            self.dir.set_low();
        }
        let duty = f64::from(power.unsigned_abs().min(255)) / 255.0;
        self.pwm
            .set_duty_cycle(duty)
            .map_err(|e| HwError::Pwm(e.to_string()))
    }
}

/// Two hardware PWM channels with a direction pin per wheel.
pub struct PwmMotors {
    left: Wheel,
    right: Wheel,
}

impl PwmMotors {
    pub fn new(
        pwm_left: u8,
        pwm_right: u8,
        dir_left: u8,
        dir_right: u8,
        frequency_hz: f64,
    ) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self {
            left: Wheel::new(&gpio, pwm_left, dir_left, frequency_hz)?,
            right: Wheel::new(&gpio, pwm_right, dir_right, frequency_hz)?,
        })
    }
}

impl Motors for PwmMotors {
    fn set_power(
        &mut self,
        left: i32,
        right: i32,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.left.drive(left)?;
        self.right.drive(right)?;
        Ok(())
    }
}

impl Drop for PwmMotors {
    fn drop(&mut self) {
        if let Err(e) = self.left.drive(0).and_then(|()| self.right.drive(0)) {
            tracing::warn!(error = %e, "failed to zero motors on drop");
        }
    }
}
