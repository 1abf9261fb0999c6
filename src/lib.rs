//! A platform agnostic Rust driver for the TAOS TSL2561 light-to-digital converter based on the
//! [`embedded-hal`](https://github.com/rust-embedded/embedded-hal) traits.
//!
//! ## Overview
//!
//! The TSL2561 combines a broadband (visible plus infrared) photodiode and an infrared-only
//! photodiode with two integrating ADCs. Illuminance in lux is derived from both channels with an
//! empirical formula that approximates the human eye response.
//!
//! * [Datasheet](https://cdn-shop.adafruit.com/datasheets/TSL2561.pdf)
//!
//! ## Usage
//!
//! ### Creation
//!
//! Import the crate and the `embedded-hal` implementation to instantiate the device. The device
//! is initialized on first use, or explicitly with [`Tsl2561::init`]:
//! ```no_run
//! use linux_embedded_hal as hal;
//!
//! use hal::{Delay, I2cdev};
//! use tsl2561::{Config, IntegrationTime, Tsl2561};
//!
//! # fn main() {
//! let dev = I2cdev::new("/dev/i2c-1").unwrap();
//! let config = Config::default()
//!     .with_integration_time(IntegrationTime::Ms101)
//!     .with_auto_gain(true);
//! let mut tsl2561 = Tsl2561::with_config(dev, Delay, config);
//! tsl2561.init().unwrap();
//! # }
//! ```
//!
//! ### Measurement
//! Every measurement powers the device up, waits for one integration period and reads both
//! channels. With auto-gain enabled a second measurement is taken whenever the gain had to be
//! switched.
//!
//!```no_run
//! use linux_embedded_hal as hal;
//!
//! use hal::{Delay, I2cdev};
//! use tsl2561::{Lux, Tsl2561};
//!
//! # fn main() {
//! # let dev = I2cdev::new("/dev/i2c-1").unwrap();
//! let mut tsl2561 = Tsl2561::new(dev, Delay);
//! match tsl2561.measure_lux().unwrap() {
//!     Lux::Value(lux) => println!("Ambient light: {lux} lx"),
//!     Lux::Saturated => println!("Sensor saturated"),
//! }
//! # }
//! ```
//!
//! ### Interrupts
//! The device can raise its INT pin when channel 0 leaves a threshold window. Thresholds are raw
//! channel 0 counts; [`Tsl2561::calculate_raw_channel0`] estimates them from lux. Disable
//! sleeping between operations when using interrupts, otherwise the device stops integrating.
//!
//!```no_run
//! use linux_embedded_hal as hal;
//!
//! use hal::{Delay, I2cdev};
//! use tsl2561::{Config, InterruptMode, Tsl2561, APPROX_CHANNEL_RATIO_SUN};
//!
//! # fn main() {
//! # let dev = I2cdev::new("/dev/i2c-1").unwrap();
//! let config = Config::default().with_allow_sleep(false);
//! let mut tsl2561 = Tsl2561::with_config(dev, Delay, config);
//! tsl2561.init().unwrap();
//!
//! let low = tsl2561.calculate_raw_channel0(50, APPROX_CHANNEL_RATIO_SUN).unwrap_or(0);
//! let high = tsl2561.calculate_raw_channel0(1000, APPROX_CHANNEL_RATIO_SUN).unwrap_or(0xFFFF);
//! tsl2561
//!     .set_interrupt_threshold(low.min(0xFFFF) as u16, high.min(0xFFFF) as u16)
//!     .unwrap();
//! tsl2561.set_interrupt_control(InterruptMode::Level, 1).unwrap();
//! # }
//! ```
#![cfg_attr(not(test), no_std)]
use core::fmt;
use embedded_hal::{delay::DelayNs, i2c::I2c};
use num_enum::IntoPrimitive;

mod config;
mod lux;

pub use config::{
    Config, Gain, IntegrationTime, InterruptMode, Package, ADDR_FLOAT, ADDR_HIGH, ADDR_LOW,
};
pub use lux::{
    Lux, LuxCalculator, RawReading, APPROX_CHANNEL_RATIO_LED, APPROX_CHANNEL_RATIO_SUN,
    SATURATED_RAW,
};

#[derive(IntoPrimitive)]
#[repr(u8)]
enum Register {
    Control = 0x00,
    Timing = 0x01,
    ThresholdLowLow = 0x02,
    ThresholdHighLow = 0x04,
    Interrupt = 0x06,
    Id = 0x0A,
    Channel0Low = 0x0C,
    Channel1Low = 0x0E,
}

// Command byte flags. Every transaction starts with a command byte addressing a register.
const COMMAND_BIT: u8 = 0x80;
const CLEAR_BIT: u8 = 0x40;
const WORD_BIT: u8 = 0x20;

const POWER_ON: u8 = 0x03;
const POWER_OFF: u8 = 0x00;

// Parts whose ID register has any of these bits set are rejected.
const ID_REJECT_MASK: u8 = 0x05;

const MAX_PERSISTENCE: u8 = 0x0F;

#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<T> {
    /// An error with the usage of the I2C interface occurred.
    Interface(T),

    /// The ID register did not identify a TSL2561. Contains the value read.
    UnknownDevice(u8),

    /// Interrupt persistence must be between 0 and 15 integration cycles.
    InvalidPersistence(u8),
}

impl<T> From<T> for Error<T> {
    fn from(e: T) -> Self {
        Self::Interface(e)
    }
}

impl<T: fmt::Debug> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Interface(e) => write!(f, "I2C error: {:?}", e),
            Error::UnknownDevice(id) => write!(f, "Unexpected ID register value {:#04x}", id),
            Error::InvalidPersistence(p) => {
                write!(f, "Invalid interrupt persistence {} (must be 0-15)", p)
            }
        }
    }
}

/// Static description of the sensor and its output range.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorDetails {
    pub name: &'static str,
    pub version: i32,
    pub sensor_id: i32,
    /// Minimum delay between events in microseconds, zero for on-demand sensors.
    pub min_delay_us: i32,
    /// Lowest reported illuminance in lux.
    pub min_value: f32,
    /// Highest reported illuminance in lux. Determined by trial rather than the datasheet.
    pub max_value: f32,
    /// Smallest illuminance step in lux.
    pub resolution: f32,
}

/// A single illuminance measurement tagged with the sensor it came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LightEvent {
    pub sensor_id: i32,
    pub lux: Lux,
}

#[derive(Copy, Clone)]
enum AutoGain {
    Unadjusted,
    // The gain was switched once already. The next reading is final.
    Adjusted,
}

#[derive(Clone, Debug)]
pub struct Tsl2561<T, D> {
    addr: u8,
    device: T,
    delay: D,
    sensor_id: i32,
    package: Package,
    allow_sleep: bool,
    auto_gain: bool,
    integration_time: IntegrationTime,
    gain: Gain,
    initialized: bool,
}

impl<T, D> Tsl2561<T, D>
where
    T: I2c,
    D: DelayNs,
{
    /// Construct the driver with the default [`Config`].
    ///
    /// # Note
    /// No bus traffic happens until the first operation or an explicit [`Tsl2561::init`].
    pub fn new(device: T, delay: D) -> Self {
        Self::with_config(device, delay, Config::default())
    }

    /// Construct the driver with a specific configuration.
    pub fn with_config(device: T, delay: D, config: Config) -> Self {
        Self {
            addr: config.address,
            device,
            delay,
            sensor_id: config.sensor_id,
            package: config.package,
            allow_sleep: config.allow_sleep,
            auto_gain: config.auto_gain,
            integration_time: config.integration_time,
            gain: config.gain,
            initialized: false,
        }
    }

    /// Release the bus and delay provider.
    pub fn destroy(self) -> (T, D) {
        (self.device, self.delay)
    }

    /// Check the device identity and apply the configured integration time and gain.
    ///
    /// The device is left powered down afterwards unless sleeping is disabled.
    pub fn init(&mut self) -> Result<(), Error<T::Error>> {
        let id = self.read_reg(Register::Id)?;
        if id & ID_REJECT_MASK != 0 {
            #[cfg(feature = "defmt")]
            defmt::warn!("Unexpected TSL2561 ID register value {=u8:#x}", id);
            return Err(Error::UnknownDevice(id));
        }
        self.initialized = true;

        self.set_integration_time(self.integration_time)?;
        self.set_gain(self.gain)?;

        self.sleep()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_initialized(&mut self) -> Result<(), Error<T::Error>> {
        if !self.initialized {
            self.init()?;
        }
        Ok(())
    }

    /// Power the device up. Conversions run continuously while it is powered.
    pub fn enable(&mut self) -> Result<(), Error<T::Error>> {
        self.write_reg(Register::Control, POWER_ON)
    }

    /// Power the device down into its low-power state.
    pub fn disable(&mut self) -> Result<(), Error<T::Error>> {
        self.write_reg(Register::Control, POWER_OFF)
    }

    fn sleep(&mut self) -> Result<(), Error<T::Error>> {
        if self.allow_sleep {
            self.disable()?;
        }
        Ok(())
    }

    /// Set the ADC integration time.
    ///
    /// Longer integration times capture more light, which helps in dim conditions, at the cost of
    /// a longer wait for every reading.
    pub fn set_integration_time(&mut self, time: IntegrationTime) -> Result<(), Error<T::Error>> {
        self.ensure_initialized()?;

        self.enable()?;
        self.write_reg(Register::Timing, u8::from(time) | u8::from(self.gain))?;
        self.integration_time = time;

        self.sleep()
    }

    /// Set the analog gain.
    pub fn set_gain(&mut self, gain: Gain) -> Result<(), Error<T::Error>> {
        self.ensure_initialized()?;

        self.enable()?;
        self.write_reg(Register::Timing, u8::from(self.integration_time) | u8::from(gain))?;
        self.gain = gain;

        self.sleep()
    }

    pub fn integration_time(&self) -> IntegrationTime {
        self.integration_time
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// Enable or disable automatic gain selection in [`Tsl2561::read_luminosity`].
    pub fn enable_auto_gain(&mut self, enable: bool) {
        self.auto_gain = enable;
    }

    pub fn auto_gain_enabled(&self) -> bool {
        self.auto_gain
    }

    /// Choose whether the device is powered down after every operation.
    ///
    /// # Note
    /// Must be disabled while using interrupts.
    pub fn set_sleep_between_reads(&mut self, allow_sleep: bool) {
        self.allow_sleep = allow_sleep;
    }

    fn acquire(&mut self) -> Result<RawReading, Error<T::Error>> {
        self.enable()?;

        // Wait for both ADCs to complete a full integration cycle.
        self.delay.delay_ms(self.integration_time.profile().delay_ms);

        let channel0 = self.read_reg_u16(Register::Channel0Low)?;
        let channel1 = self.read_reg_u16(Register::Channel1Low)?;

        self.sleep()?;

        Ok(RawReading { channel0, channel1 })
    }

    /// Take a single reading of both channels at the current gain.
    ///
    /// # Note
    /// This blocks for slightly longer than the integration time.
    pub fn read_raw(&mut self) -> Result<RawReading, Error<T::Error>> {
        self.ensure_initialized()?;
        self.acquire()
    }

    /// Read both channels, adjusting the gain first if auto-gain is enabled.
    ///
    /// With auto-gain, a channel 0 reading below the lower threshold for the integration time
    /// switches 1x gain to 16x, and a reading above the upper threshold switches 16x to 1x. After a
    /// switch the reading is repeated and returned as-is, so at most two readings are taken.
    pub fn read_luminosity(&mut self) -> Result<RawReading, Error<T::Error>> {
        self.ensure_initialized()?;

        if !self.auto_gain {
            return self.acquire();
        }

        let mut state = AutoGain::Unadjusted;
        let mut reading = self.acquire()?;

        loop {
            match state {
                AutoGain::Adjusted => return Ok(reading),
                AutoGain::Unadjusted => {
                    let profile = self.integration_time.profile();
                    let target = match self.gain {
                        Gain::Low if reading.channel0 < profile.agc_low => Gain::High,
                        Gain::High if reading.channel0 > profile.agc_high => Gain::Low,
                        // Either in range, or already at the limit of the chip.
                        _ => return Ok(reading),
                    };

                    #[cfg(feature = "defmt")]
                    defmt::debug!(
                        "Auto-gain: channel 0 at {=u16}, switching to {}",
                        reading.channel0,
                        target
                    );

                    self.set_gain(target)?;
                    reading = self.acquire()?;
                    state = AutoGain::Adjusted;
                }
            }
        }
    }

    /// A lux calculator for the current integration time, gain and package.
    pub fn calculator(&self) -> LuxCalculator {
        LuxCalculator::new(self.integration_time, self.gain, self.package)
    }

    /// Convert raw channel counts taken at the current configuration to lux.
    pub fn calculate_lux(&self, channel0: u16, channel1: u16) -> Lux {
        let lux = self.calculator().lux(channel0, channel1);

        #[cfg(feature = "defmt")]
        if lux.is_saturated() {
            defmt::debug!("Saturated: channel 0 {=u16}, channel 1 {=u16}", channel0, channel1);
        }

        lux
    }

    /// Estimate the raw channel 0 count for an illuminance, for use as an interrupt threshold.
    ///
    /// See [`LuxCalculator::estimate_channel0`].
    pub fn calculate_raw_channel0(&self, lux: u16, channel_ratio: f32) -> Option<u32> {
        self.calculator().estimate_channel0(lux, channel_ratio)
    }

    /// Measure the ambient light level in lux.
    pub fn measure_lux(&mut self) -> Result<Lux, Error<T::Error>> {
        let reading = self.read_luminosity()?;
        Ok(self.calculate_lux(reading.channel0, reading.channel1))
    }

    /// Measure the ambient light level and tag it with the sensor ID.
    pub fn read_event(&mut self) -> Result<LightEvent, Error<T::Error>> {
        Ok(LightEvent {
            sensor_id: self.sensor_id,
            lux: self.measure_lux()?,
        })
    }

    pub fn details(&self) -> SensorDetails {
        SensorDetails {
            name: "TSL2561",
            version: 1,
            sensor_id: self.sensor_id,
            min_delay_us: 0,
            min_value: 0.0,
            max_value: 17000.0,
            resolution: 1.0,
        }
    }

    /// Configure the interrupt output.
    ///
    /// `persistence` is the number of consecutive integration cycles channel 0 must stay outside
    /// the threshold window before an interrupt fires. Zero fires after every cycle regardless of
    /// the thresholds.
    pub fn set_interrupt_control(
        &mut self,
        mode: InterruptMode,
        persistence: u8,
    ) -> Result<(), Error<T::Error>> {
        if persistence > MAX_PERSISTENCE {
            return Err(Error::InvalidPersistence(persistence));
        }

        self.ensure_initialized()?;

        self.enable()?;
        self.write_reg(
            Register::Interrupt,
            ((u8::from(mode) & 0b11) << 4) | persistence,
        )?;

        // Note: this also stops interrupts from being generated.
        self.sleep()
    }

    /// Set the channel 0 interrupt window in raw counts.
    ///
    /// # Note
    /// Thresholds are not lux values. Use [`Tsl2561::calculate_raw_channel0`] to derive them.
    pub fn set_interrupt_threshold(&mut self, low: u16, high: u16) -> Result<(), Error<T::Error>> {
        self.write_reg_u16(Register::ThresholdLowLow, low)?;
        self.write_reg_u16(Register::ThresholdHighLow, high)
    }

    /// Clear a latched level interrupt.
    pub fn clear_level_interrupt(&mut self) -> Result<(), Error<T::Error>> {
        self.device.write(self.addr, &[COMMAND_BIT | CLEAR_BIT])?;
        Ok(())
    }

    fn write_reg(&mut self, reg: Register, value: u8) -> Result<(), Error<T::Error>> {
        self.device
            .write(self.addr, &[COMMAND_BIT | u8::from(reg), value])?;
        Ok(())
    }

    // Written as two byte writes, low byte register first.
    fn write_reg_u16(&mut self, reg: Register, value: u16) -> Result<(), Error<T::Error>> {
        let address = COMMAND_BIT | u8::from(reg);
        let [low, high] = value.to_le_bytes();

        self.device.write(self.addr, &[address, low])?;
        self.device.write(self.addr, &[address + 1, high])?;
        Ok(())
    }

    fn read_reg(&mut self, reg: Register) -> Result<u8, Error<T::Error>> {
        let mut result = [0u8; 1];
        self.device
            .write_read(self.addr, &[COMMAND_BIT | u8::from(reg)], &mut result[..])?;
        Ok(result[0])
    }

    fn read_reg_u16(&mut self, reg: Register) -> Result<u16, Error<T::Error>> {
        let mut bytes = [0u8; 2];
        self.device.write_read(
            self.addr,
            &[COMMAND_BIT | WORD_BIT | u8::from(reg)],
            &mut bytes[..],
        )?;
        Ok(u16::from_le_bytes(bytes))
    }
}
