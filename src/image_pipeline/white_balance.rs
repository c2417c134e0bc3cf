//! White-balance coefficients and their calibration from a reference frame.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::image_pipeline::common::error::{AcquisitionError, Result};
use crate::image_pipeline::debayer::{self, DebayerAlgorithm};
use crate::image_pipeline::raw::RawFrame;

/// Rec. 709 luma weights.
const LUMA_R: f64 = 0.2126;
const LUMA_G: f64 = 0.7152;
const LUMA_B: f64 = 0.0722;

/// Per-channel gains applied while packing debayered pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalanceCoefficients {
    pub red_scale: f64,
    pub green_scale: f64,
    pub blue_scale: f64,
}

impl Default for WhiteBalanceCoefficients {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl WhiteBalanceCoefficients {
    pub const NEUTRAL: Self = Self {
        red_scale: 1.0,
        green_scale: 1.0,
        blue_scale: 1.0,
    };

    pub fn new(red_scale: f64, green_scale: f64, blue_scale: f64) -> Result<Self> {
        for (name, scale) in [("red", red_scale), ("green", green_scale), ("blue", blue_scale)] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(AcquisitionError::InvalidConfig(format!(
                    "{name} white-balance scale must be positive, got {scale}"
                )));
            }
        }
        Ok(Self {
            red_scale,
            green_scale,
            blue_scale,
        })
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }

    /// Largest absolute deviation of any scale from 1.0.
    pub fn max_deviation(&self) -> f64 {
        [self.red_scale, self.green_scale, self.blue_scale]
            .iter()
            .map(|s| (s - 1.0).abs())
            .fold(0.0, f64::max)
    }
}

/// Derives white-balance coefficients from a Bayer frame of a neutral subject.
#[derive(Debug, Clone, Copy)]
pub struct WhiteBalanceCalibrator {
    algorithm: DebayerAlgorithm,
    /// Deviation from 1.0, as a fraction of full scale, above which the
    /// derived coefficients are reported as suspicious.
    tolerance: f64,
}

impl WhiteBalanceCalibrator {
    pub fn new(algorithm: DebayerAlgorithm, tolerance: f64) -> Self {
        Self { algorithm, tolerance }
    }

    /// Debayers `frame` with neutral gains, sums each channel and derives
    /// `scale = L / sum` where `L` is the luminance of the channel sums.
    /// A zero channel sum yields a scale of 1.
    #[instrument(skip(self, frame), fields(width = frame.width, height = frame.height))]
    pub fn calibrate(&self, frame: &RawFrame<'_>) -> Result<WhiteBalanceCoefficients> {
        let rgb = debayer::demosaic(frame, self.algorithm)?;
        let [r_sum, g_sum, b_sum] = rgb.channel_sums();

        let lumin = LUMA_R * r_sum + LUMA_G * g_sum + LUMA_B * b_sum;
        let scale = |sum: f64| if sum > 0.0 { lumin / sum } else { 1.0 };

        let coefficients = WhiteBalanceCoefficients {
            red_scale: scale(r_sum),
            green_scale: scale(g_sum),
            blue_scale: scale(b_sum),
        };

        info!(
            r_scale = coefficients.red_scale,
            g_scale = coefficients.green_scale,
            b_scale = coefficients.blue_scale,
            "White balance parameters"
        );

        if coefficients.max_deviation() > self.tolerance {
            warn!(
                deviation = coefficients.max_deviation(),
                tolerance = self.tolerance,
                "White balance scales deviate strongly from 1.0, calibration frame may be miscalibrated"
            );
        }

        Ok(coefficients)
    }
}
