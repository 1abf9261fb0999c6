//! Sensor settings: integration time, gain, package variant and the driver [`Config`].

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// I2C address when the ADDR SEL pin is tied to ground.
pub const ADDR_LOW: u8 = 0x29;

/// I2C address when the ADDR SEL pin is left floating.
pub const ADDR_FLOAT: u8 = 0x39;

/// I2C address when the ADDR SEL pin is tied to VDD.
pub const ADDR_HIGH: u8 = 0x49;

/// ADC integration time, encoded as it appears in the low bits of the timing register.
#[derive(IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrationTime {
    /// 13.7 ms. Fastest conversion, smallest dynamic range.
    Ms13 = 0x00,
    /// 101 ms.
    Ms101 = 0x01,
    /// 402 ms. Nominal integration time that the lux coefficients are referenced to.
    Ms402 = 0x02,
}

impl IntegrationTime {
    /// The nominal integration window in milliseconds.
    pub fn nominal_ms(self) -> u32 {
        match self {
            IntegrationTime::Ms13 => 13,
            IntegrationTime::Ms101 => 101,
            IntegrationTime::Ms402 => 402,
        }
    }

    pub(crate) fn profile(self) -> &'static TimingProfile {
        &TIMING_PROFILES[u8::from(self) as usize]
    }
}

/// Analog gain applied ahead of the ADC, encoded as its timing register bit.
#[derive(IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    /// 1x gain, for bright light.
    Low = 0x00,
    /// 16x gain, for dim light.
    High = 0x10,
}

/// Physical package of the sensor. The two families use different lux coefficients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Package {
    /// T, FN and CL packages.
    #[default]
    T,
    /// Chipscale (CS) package.
    Cs,
}

/// Behaviour of the INT output pin.
#[derive(IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptMode {
    /// Interrupt output disabled.
    Disabled = 0x00,
    /// Level interrupt, latched until cleared. Compared against the channel 0 thresholds.
    Level = 0x01,
    /// SMBus alert compliant interrupt.
    SmbAlert = 0x02,
    /// Sets an interrupt immediately and behaves as SMBus alert mode.
    Test = 0x03,
}

/// Constants that depend only on the integration time.
#[derive(Debug)]
pub(crate) struct TimingProfile {
    /// Time to wait after power-up before both ADC channels hold a complete conversion.
    pub delay_ms: u32,
    /// Highest raw count on either channel that is still considered unsaturated.
    pub clip_threshold: u16,
    /// Factor that brings a 16x reading at this integration time to the 402 ms scale,
    /// in `2^CH_SCALE` fixed point.
    pub channel_scale: u32,
    /// Channel 0 counts below which auto-gain switches up to 16x.
    pub agc_low: u16,
    /// Channel 0 counts above which auto-gain switches down to 1x.
    pub agc_high: u16,
}

// Indexed by the integration time register code.
static TIMING_PROFILES: [TimingProfile; 3] = [
    TimingProfile {
        delay_ms: 15,
        clip_threshold: 4900,
        // 322/11 * 2^10
        channel_scale: 0x7517,
        agc_low: 100,
        agc_high: 4850,
    },
    TimingProfile {
        delay_ms: 120,
        clip_threshold: 37000,
        // 322/81 * 2^10
        channel_scale: 0x0FE7,
        agc_low: 200,
        agc_high: 36000,
    },
    TimingProfile {
        delay_ms: 450,
        clip_threshold: 65000,
        channel_scale: 1 << 10,
        agc_low: 500,
        agc_high: 63000,
    },
];

/// Driver configuration applied when the driver is constructed.
///
/// The integration time and gain stored here are written to the device during
/// initialization and can be changed afterwards through the driver.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub address: u8,
    pub sensor_id: i32,
    /// Power the device down after every operation. Must be disabled when interrupts are used,
    /// since a powered-down device does not integrate.
    pub allow_sleep: bool,
    pub package: Package,
    pub integration_time: IntegrationTime,
    pub gain: Gain,
    pub auto_gain: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: ADDR_FLOAT,
            sensor_id: -1,
            allow_sleep: true,
            package: Package::T,
            integration_time: IntegrationTime::Ms13,
            gain: Gain::Low,
            auto_gain: false,
        }
    }
}

impl Config {
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_sensor_id(mut self, sensor_id: i32) -> Self {
        self.sensor_id = sensor_id;
        self
    }

    pub fn with_allow_sleep(mut self, allow_sleep: bool) -> Self {
        self.allow_sleep = allow_sleep;
        self
    }

    pub fn with_package(mut self, package: Package) -> Self {
        self.package = package;
        self
    }

    pub fn with_integration_time(mut self, integration_time: IntegrationTime) -> Self {
        self.integration_time = integration_time;
        self
    }

    pub fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_auto_gain(mut self, auto_gain: bool) -> Self {
        self.auto_gain = auto_gain;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_follow_register_codes() {
        assert_eq!(IntegrationTime::Ms13.profile().clip_threshold, 4900);
        assert_eq!(IntegrationTime::Ms101.profile().clip_threshold, 37000);
        assert_eq!(IntegrationTime::Ms402.profile().clip_threshold, 65000);

        assert_eq!(IntegrationTime::Ms13.profile().delay_ms, 15);
        assert_eq!(IntegrationTime::Ms402.profile().channel_scale, 1024);
    }

    #[test]
    fn agc_band_lies_inside_clip_range() {
        for time in [
            IntegrationTime::Ms13,
            IntegrationTime::Ms101,
            IntegrationTime::Ms402,
        ] {
            let profile = time.profile();
            assert!(profile.agc_low < profile.agc_high);
            assert!(profile.agc_high < profile.clip_threshold);
            assert!(profile.delay_ms > time.nominal_ms());
        }
    }

    #[test]
    fn timing_register_codes() {
        assert_eq!(u8::from(IntegrationTime::Ms402) | u8::from(Gain::High), 0x12);
        assert_eq!(IntegrationTime::try_from(0x01).unwrap(), IntegrationTime::Ms101);
        assert!(IntegrationTime::try_from(0x03).is_err());
    }

    #[test]
    fn builder() {
        let config = Config::default()
            .with_address(ADDR_HIGH)
            .with_package(Package::Cs)
            .with_auto_gain(true);

        assert_eq!(config.address, 0x49);
        assert_eq!(config.package, Package::Cs);
        assert!(config.auto_gain);
        assert!(config.allow_sleep);
        assert_eq!(config.integration_time, IntegrationTime::Ms13);
    }
}
