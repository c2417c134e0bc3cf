//! Types for debayering operations

use serde::{Deserialize, Serialize};

/// Linear RGB image data after debayering, before white balance and packing
#[derive(Debug, Clone)]
pub struct RgbImageData {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
    /// RGB pixel data interleaved [R, G, B, R, G, B, ...]
    pub data: Vec<u16>,
    /// Actual bits per sample from the sensor (e.g., 12, 14, or 16)
    pub bits_per_sample: u32,
}

impl RgbImageData {
    pub fn new(width: usize, height: usize, bits_per_sample: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u16; width * height * 3],
            bits_per_sample,
        }
    }

    /// `[r, g, b]` at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u16; 3]> {
        let i = (y * self.width + x) * 3;
        Some([*self.data.get(i)?, *self.data.get(i + 1)?, *self.data.get(i + 2)?])
    }

    /// Per-channel sums over the whole image.
    pub fn channel_sums(&self) -> [f64; 3] {
        self.data.chunks_exact(3).fold([0.0; 3], |mut acc, px| {
            acc[0] += f64::from(px[0]);
            acc[1] += f64::from(px[1]);
            acc[2] += f64::from(px[2]);
            acc
        })
    }
}

/// Demosaic algorithm used for `SensorType::BayerColor` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebayerAlgorithm {
    /// Nearest same-color sample inside each 2x2 block
    #[default]
    Replication,
    /// Linear interpolation from the `bayer` crate
    Bilinear,
    /// Green first, then red/blue through local green-ratio smoothing
    SmoothHue,
    /// Smooth hue with green extrapolated along the smoothest edge direction
    AdaptiveSmoothHue,
}
