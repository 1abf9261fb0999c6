//! Conversion of raw channel counts to lux using the empirical TSL2561 model.
//!
//! The forward conversion is the integer fixed-point algorithm from the datasheet: both
//! channels are scaled to the nominal 402 ms / 16x reference, the channel 1 to channel 0 ratio
//! selects one of eight linear segments, and the segment's coefficients give the illuminance.
//!
//! The inverse conversion ([`LuxCalculator::estimate_channel0`]) is only needed for expressing
//! interrupt thresholds in lux. It solves the unsegmented datasheet formulas for channel 0 and
//! is computed in `f32`, so its output is not bit-for-bit the inverse of [`LuxCalculator::lux`].

use crate::config::{Gain, IntegrationTime, Package};

/// Channel 1 / channel 0 ratio typical for sunlight, for use with the inverse conversion.
pub const APPROX_CHANNEL_RATIO_SUN: f32 = 0.325;

/// Channel 1 / channel 0 ratio typical for LED lighting, for use with the inverse conversion.
pub const APPROX_CHANNEL_RATIO_LED: f32 = 0.100;

/// Legacy encoding of a saturated reading, see [`Lux::to_raw`].
pub const SATURATED_RAW: u32 = 65536;

const LUX_SCALE: u32 = 14;
const RATIO_SCALE: u32 = 9;
const CH_SCALE: u32 = 10;

/// The two photodiode counts from one acquisition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawReading {
    /// Broadband (visible and infrared) photodiode.
    pub channel0: u16,
    /// Infrared-only photodiode.
    pub channel1: u16,
}

/// A calculated illuminance.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lux {
    /// Illuminance in lux.
    Value(u32),
    /// One of the channels exceeded the clip threshold for the integration time, so the reading
    /// cannot be trusted.
    Saturated,
}

impl Lux {
    pub fn is_saturated(&self) -> bool {
        matches!(self, Lux::Saturated)
    }

    /// The illuminance, or `None` when saturated.
    pub fn value(&self) -> Option<u32> {
        match self {
            Lux::Value(lux) => Some(*lux),
            Lux::Saturated => None,
        }
    }

    /// Encode as a single integer where [`SATURATED_RAW`] marks saturation.
    ///
    /// # Note
    /// At 13 ms and 1x gain an unsaturated reading can exceed 65536 lux, so the encoding is
    /// ambiguous there. Prefer matching on the enum.
    pub fn to_raw(&self) -> u32 {
        match self {
            Lux::Value(lux) => *lux,
            Lux::Saturated => SATURATED_RAW,
        }
    }
}

// One linear piece of the lux model: for ratios up to `k`, lux = ch0 * b - ch1 * m.
struct Segment {
    k: u32,
    b: u32,
    m: u32,
}

const fn segment(k: u32, b: u32, m: u32) -> Segment {
    Segment { k, b, m }
}

// k in 2^RATIO_SCALE, b and m in 2^LUX_SCALE fixed point.
static SEGMENTS_T: [Segment; 8] = [
    segment(0x0040, 0x01f2, 0x01be), // 0.125, 0.0304, 0.0272
    segment(0x0080, 0x0214, 0x02d1), // 0.250, 0.0325, 0.0440
    segment(0x00c0, 0x023f, 0x037b), // 0.375, 0.0351, 0.0544
    segment(0x0100, 0x0270, 0x03fe), // 0.50, 0.0381, 0.0624
    segment(0x0138, 0x016f, 0x01fc), // 0.61, 0.0224, 0.0310
    segment(0x019a, 0x00d2, 0x00fb), // 0.80, 0.0128, 0.0153
    segment(0x029a, 0x0018, 0x0012), // 1.3, 0.00146, 0.00112
    segment(0x029a, 0x0000, 0x0000),
];

static SEGMENTS_CS: [Segment; 8] = [
    segment(0x0043, 0x0204, 0x01ad), // 0.130, 0.0315, 0.0262
    segment(0x0085, 0x0228, 0x02c1), // 0.260, 0.0337, 0.0430
    segment(0x00c8, 0x0253, 0x0363), // 0.390, 0.0363, 0.0529
    segment(0x010a, 0x0282, 0x03df), // 0.520, 0.0392, 0.0605
    segment(0x014d, 0x0177, 0x01dd), // 0.65, 0.0229, 0.0291
    segment(0x019a, 0x0101, 0x0127), // 0.80, 0.0157, 0.0180
    segment(0x029a, 0x0037, 0x002b), // 1.3, 0.00338, 0.00260
    segment(0x029a, 0x0000, 0x0000),
];

// Datasheet formula for ratios up to `upper`: lux / ch0 = intercept - slope * ratio^exponent.
struct InverseSegment {
    upper: f32,
    intercept: f32,
    slope: f32,
    exponent: f32,
}

const fn inverse(upper: f32, intercept: f32, slope: f32, exponent: f32) -> InverseSegment {
    InverseSegment {
        upper,
        intercept,
        slope,
        exponent,
    }
}

static INVERSE_T: [InverseSegment; 4] = [
    inverse(0.50, 0.0304, 0.062, 1.4),
    inverse(0.61, 0.0224, 0.031, 1.0),
    inverse(0.80, 0.0128, 0.0153, 1.0),
    inverse(1.30, 0.00146, 0.00112, 1.0),
];

static INVERSE_CS: [InverseSegment; 4] = [
    inverse(0.52, 0.0315, 0.0593, 1.4),
    inverse(0.65, 0.0229, 0.0291, 1.0),
    inverse(0.80, 0.0157, 0.0180, 1.0),
    inverse(1.30, 0.00338, 0.00260, 1.0),
];

impl Package {
    fn segments(self) -> &'static [Segment; 8] {
        match self {
            Package::T => &SEGMENTS_T,
            Package::Cs => &SEGMENTS_CS,
        }
    }

    fn inverse_segments(self) -> &'static [InverseSegment; 4] {
        match self {
            Package::T => &INVERSE_T,
            Package::Cs => &INVERSE_CS,
        }
    }
}

/// Lux conversion for one sensor configuration.
///
/// Raw counts only mean something together with the integration time and gain they were
/// captured with, so the calculator is built from exactly those settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LuxCalculator {
    integration_time: IntegrationTime,
    gain: Gain,
    package: Package,
}

impl LuxCalculator {
    pub fn new(integration_time: IntegrationTime, gain: Gain, package: Package) -> Self {
        Self {
            integration_time,
            gain,
            package,
        }
    }

    // Scale to the 402 ms / 16x reference, in 2^CH_SCALE fixed point.
    fn channel_scale(&self) -> u32 {
        let scale = self.integration_time.profile().channel_scale;
        match self.gain {
            Gain::Low => scale << 4,
            Gain::High => scale,
        }
    }

    /// Convert a raw channel pair to lux.
    ///
    /// Returns [`Lux::Saturated`] if either channel is above the clip threshold of the
    /// integration time. A channel exactly at the threshold is still converted.
    pub fn lux(&self, channel0: u16, channel1: u16) -> Lux {
        let clip_threshold = self.integration_time.profile().clip_threshold;
        if channel0 > clip_threshold || channel1 > clip_threshold {
            return Lux::Saturated;
        }

        let scale = u64::from(self.channel_scale());
        let channel0 = (u64::from(channel0) * scale) >> CH_SCALE;
        let channel1 = (u64::from(channel1) * scale) >> CH_SCALE;

        // Computed with one extra bit of precision so it can be rounded.
        let ratio = if channel0 != 0 {
            (channel1 << (RATIO_SCALE + 1)) / channel0
        } else {
            0
        };
        let ratio = (ratio + 1) >> 1;

        let segments = self.package.segments();
        let segment = segments
            .iter()
            .find(|segment| ratio <= u64::from(segment.k))
            .unwrap_or(&segments[segments.len() - 1]);

        let lux = (channel0 * u64::from(segment.b)).saturating_sub(channel1 * u64::from(segment.m));
        let lux = (lux + (1 << (LUX_SCALE - 1))) >> LUX_SCALE;

        Lux::Value(lux as u32)
    }

    /// Estimate the channel 0 count that corresponds to `lux`, assuming the light has the given
    /// channel 1 / channel 0 ratio.
    ///
    /// The interrupt thresholds of the device only apply to channel 0, so this is how a lux
    /// threshold is turned into a register value. See [`APPROX_CHANNEL_RATIO_SUN`] and
    /// [`APPROX_CHANNEL_RATIO_LED`] for typical ratios.
    ///
    /// Returns `None` if the ratio is outside the modelled range (above 1.30) or the model
    /// predicts no light at that ratio.
    ///
    /// # Note
    /// The result depends on the integration time and gain, so configure both before computing
    /// thresholds, and avoid auto-gain while thresholds are armed.
    pub fn estimate_channel0(&self, lux: u16, ratio: f32) -> Option<u32> {
        // NaN compares false against every bound.
        let segment = self
            .package
            .inverse_segments()
            .iter()
            .find(|segment| ratio <= segment.upper)?;

        let divisor = segment.intercept - segment.slope * libm::powf(ratio, segment.exponent);
        // A negative ratio raised to 1.4 is NaN.
        if divisor.is_nan() || divisor <= 0.0 {
            return None;
        }

        let lux_scaled = u32::from(lux) << CH_SCALE;
        let channel0_scaled = (lux_scaled as f32 / divisor) as u32;

        Some(channel0_scaled / self.channel_scale())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMES: [IntegrationTime; 3] = [
        IntegrationTime::Ms13,
        IntegrationTime::Ms101,
        IntegrationTime::Ms402,
    ];
    const GAINS: [Gain; 2] = [Gain::Low, Gain::High];

    fn calculator(time: IntegrationTime, gain: Gain) -> LuxCalculator {
        LuxCalculator::new(time, gain, Package::T)
    }

    #[test]
    fn regression_402ms_low_gain() {
        let lux = calculator(IntegrationTime::Ms402, Gain::Low).lux(100, 30);
        assert_eq!(lux, Lux::Value(30));
    }

    #[test]
    fn regression_402ms_high_gain() {
        let lux = calculator(IntegrationTime::Ms402, Gain::High).lux(40000, 24000);
        assert_eq!(lux, Lux::Value(152));
    }

    #[test]
    fn dark_reading_is_zero() {
        for time in TIMES {
            for gain in GAINS {
                assert_eq!(calculator(time, gain).lux(0, 0), Lux::Value(0));
            }
        }
    }

    #[test]
    fn clip_threshold_boundary() {
        for time in TIMES {
            let clip = time.profile().clip_threshold;
            for gain in GAINS {
                let calculator = calculator(time, gain);
                assert!(!calculator.lux(clip, 0).is_saturated());
                assert!(!calculator.lux(clip, clip).is_saturated());
                assert!(calculator.lux(clip + 1, 0).is_saturated());
                assert!(calculator.lux(0, clip + 1).is_saturated());
            }
        }
    }

    #[test]
    fn saturated_at_13ms_regardless_of_channel1() {
        let calculator = calculator(IntegrationTime::Ms13, Gain::Low);
        for channel1 in [0, 100, 4900, 4901, u16::MAX] {
            assert_eq!(calculator.lux(4901, channel1), Lux::Saturated);
        }
        assert_eq!(calculator.lux(4901, 0).to_raw(), SATURATED_RAW);
    }

    #[test]
    fn full_scale_low_gain_exceeds_16_bits() {
        let lux = calculator(IntegrationTime::Ms13, Gain::Low).lux(4900, 0);
        assert_eq!(lux, Lux::Value(69756));
    }

    #[test]
    fn monotonic_in_channel0_for_fixed_ratio() {
        for time in TIMES {
            let clip = time.profile().clip_threshold;
            for gain in GAINS {
                let calculator = calculator(time, gain);
                let mut previous = 0;
                for channel0 in (0..=clip).step_by(10) {
                    let lux = calculator
                        .lux(channel0, channel0 / 10 * 3)
                        .value()
                        .unwrap();
                    assert!(
                        lux >= previous,
                        "{:?} {:?} channel0={}",
                        time,
                        gain,
                        channel0
                    );
                    previous = lux;
                }
            }
        }
    }

    #[test]
    fn infrared_heavy_light_reads_zero() {
        // Ratio above 1.3 selects the last segment.
        let lux = calculator(IntegrationTime::Ms402, Gain::High).lux(1000, 2000);
        assert_eq!(lux, Lux::Value(0));
    }

    #[test]
    fn packages_use_distinct_coefficients() {
        let t = LuxCalculator::new(IntegrationTime::Ms402, Gain::High, Package::T);
        let cs = LuxCalculator::new(IntegrationTime::Ms402, Gain::High, Package::Cs);

        // Ratio 0.1 lands in the first segment of both tables.
        // T:  (10000 * 0x1f2 - 1000 * 0x1be + 8192) >> 14 = 277
        // CS: (10000 * 0x204 - 1000 * 0x1ad + 8192) >> 14 = 289
        assert_eq!(t.lux(10000, 1000), Lux::Value(277));
        assert_eq!(cs.lux(10000, 1000), Lux::Value(289));
    }

    #[test]
    fn estimate_rejects_ratio_outside_model() {
        let calculator = calculator(IntegrationTime::Ms402, Gain::High);
        assert_eq!(calculator.estimate_channel0(100, 1.31), None);
        assert_eq!(calculator.estimate_channel0(100, f32::NAN), None);
        assert!(calculator.estimate_channel0(100, 1.30).is_some());
    }

    #[test]
    fn estimate_scales_with_configuration() {
        let high = calculator(IntegrationTime::Ms402, Gain::High)
            .estimate_channel0(152, 0.6)
            .unwrap();
        let low = calculator(IntegrationTime::Ms402, Gain::Low)
            .estimate_channel0(152, 0.6)
            .unwrap();

        assert!((39990..=40010).contains(&high));
        // 1x gain needs sixteen times the light for the same count.
        assert!((high / 16).abs_diff(low) <= 1);
    }

    #[test]
    fn estimate_round_trip() {
        for (package, ratio, tolerance_percent) in [
            (Package::T, 0.6, 1),
            (Package::T, APPROX_CHANNEL_RATIO_SUN, 2),
            (Package::T, APPROX_CHANNEL_RATIO_LED, 2),
            (Package::Cs, 0.6, 2),
        ] {
            let calculator = LuxCalculator::new(IntegrationTime::Ms402, Gain::High, package);
            for channel0 in [20000u16, 40000] {
                let channel1 = (f32::from(channel0) * ratio) as u16;
                let lux = calculator.lux(channel0, channel1).value().unwrap();

                let estimate = calculator.estimate_channel0(lux as u16, ratio).unwrap();
                let estimate = u16::try_from(estimate).unwrap();
                let back = calculator
                    .lux(estimate, (f32::from(estimate) * ratio) as u16)
                    .value()
                    .unwrap();

                assert!(
                    back.abs_diff(lux) * 100 <= lux * tolerance_percent + 100,
                    "{:?} ratio={} lux={} back={}",
                    package,
                    ratio,
                    lux,
                    back
                );
            }
        }
    }
}
