//! Raw sensor frame types

use serde::{Deserialize, Serialize};

/// Kind of sensor that produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    #[default]
    Monochrome,
    BayerColor,
    Polarized,
}

impl SensorType {
    /// Whether the sensor carries a 2x2 filter mosaic that binning or odd
    /// offsets would break.
    pub fn is_mosaic(self) -> bool {
        matches!(self, Self::BayerColor | Self::Polarized)
    }
}

/// Row/column order of the Bayer color filter array, named after the first
/// two rows of the top-left 2x2 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BayerPhase {
    /// R-G-R-G / G-B-G-B
    #[default]
    Rggb,
    /// B-G-B-G / G-R-G-R
    Bggr,
    /// G-R-G-R / B-G-B-G
    Grbg,
    /// G-B-G-B / R-G-R-G
    Gbrg,
}

/// Color channel sensed by one mosaic pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl BayerPhase {
    /// Offset of the red sample inside every 2x2 block.
    pub fn red_offset(self) -> (usize, usize) {
        match self {
            Self::Rggb => (0, 0),
            Self::Bggr => (1, 1),
            Self::Grbg => (1, 0),
            Self::Gbrg => (0, 1),
        }
    }

    /// Offset of the blue sample inside every 2x2 block.
    pub fn blue_offset(self) -> (usize, usize) {
        let (rx, ry) = self.red_offset();
        (1 - rx, 1 - ry)
    }

    pub fn channel_at(self, x: usize, y: usize) -> Channel {
        let (rx, ry) = self.red_offset();
        let (bx, by) = self.blue_offset();
        match (x % 2, y % 2) {
            (cx, cy) if cx == rx && cy == ry => Channel::Red,
            (cx, cy) if cx == bx && cy == by => Channel::Blue,
            _ => Channel::Green,
        }
    }
}

/// Polarizer angle of the top-left pixel of every 2x2 super-pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolarPhase {
    Deg0,
    Deg45,
    #[default]
    Deg90,
    Deg135,
}

impl PolarPhase {
    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg45 => 45,
            Self::Deg90 => 90,
            Self::Deg135 => 135,
        }
    }

    /// Polarizer angle in degrees at mosaic position `(x, y)`.
    ///
    /// The super-pixel layout is `[t, t-45; t+45, t+90]` (mod 180).
    pub fn angle_at(self, x: usize, y: usize) -> u32 {
        let delta = match (x % 2, y % 2) {
            (0, 0) => 0,
            (1, 0) => 135,
            (0, 1) => 45,
            _ => 90,
        };
        (self.degrees() + delta) % 180
    }
}

/// Sample container of a raw frame.
///
/// The buffer is borrowed from the frame producer and is only valid for the
/// duration of a single delivery.
#[derive(Debug, Clone, Copy)]
pub enum RawSamples<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
}

impl RawSamples<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::U8(data) => data.len(),
            Self::U16(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width in bits of a single sample slot.
    pub fn container_bits(&self) -> u32 {
        match self {
            Self::U8(_) => 8,
            Self::U16(_) => 16,
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<u16> {
        match self {
            Self::U8(data) => data.get(index).map(|&v| u16::from(v)),
            Self::U16(data) => data.get(index).copied(),
        }
    }
}

/// A frame as delivered by the hardware layer.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// Width of the frame in pixels
    pub width: usize,
    /// Height of the frame in pixels
    pub height: usize,
    /// Significant bits per sample (e.g., 8, 12, 14 or 16)
    pub bits_per_sample: u32,
    pub sensor_type: SensorType,
    /// Only meaningful for `SensorType::BayerColor`
    pub bayer_phase: BayerPhase,
    /// Only meaningful for `SensorType::Polarized`
    pub polar_phase: PolarPhase,
    pub samples: RawSamples<'a>,
}

impl<'a> RawFrame<'a> {
    pub fn monochrome(width: usize, height: usize, bits_per_sample: u32, samples: RawSamples<'a>) -> Self {
        Self {
            width,
            height,
            bits_per_sample,
            sensor_type: SensorType::Monochrome,
            bayer_phase: BayerPhase::default(),
            polar_phase: PolarPhase::default(),
            samples,
        }
    }

    pub fn bayer(width: usize, height: usize, bits_per_sample: u32, phase: BayerPhase, data: &'a [u16]) -> Self {
        Self {
            width,
            height,
            bits_per_sample,
            sensor_type: SensorType::BayerColor,
            bayer_phase: phase,
            polar_phase: PolarPhase::default(),
            samples: RawSamples::U16(data),
        }
    }

    pub fn polarized(width: usize, height: usize, bits_per_sample: u32, phase: PolarPhase, data: &'a [u16]) -> Self {
        Self {
            width,
            height,
            bits_per_sample,
            sensor_type: SensorType::Polarized,
            bayer_phase: BayerPhase::default(),
            polar_phase: phase,
            samples: RawSamples::U16(data),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Sample at `(x, y)`; taps outside the frame read as 0.
    #[inline]
    pub fn sample(&self, x: isize, y: isize) -> u16 {
        if x < 0 || y < 0 {
            return 0;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.samples.get(y * self.width + x).unwrap_or(0)
    }
}
