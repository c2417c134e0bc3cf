//! Debayering module for converting Bayer mosaic frames to linear RGB

pub mod adaptive_smooth_hue;
pub mod cpu_debayer;
pub mod replication;
pub mod smooth_hue;
pub mod types;

pub use adaptive_smooth_hue::AdaptiveSmoothHueDebayer;
pub use cpu_debayer::CpuDebayer;
pub use replication::ReplicationDebayer;
pub use smooth_hue::SmoothHueDebayer;
pub use types::{DebayerAlgorithm, RgbImageData};

use crate::image_pipeline::common::error::{AcquisitionError, Result};
use crate::image_pipeline::raw::{RawFrame, RawSamples, SensorType};

/// Checks that a frame can be demosaiced: a Bayer sensor with a 16-bit sample
/// container holding between 8 and 16 significant bits.
pub fn check_bayer_input(frame: &RawFrame<'_>) -> Result<()> {
    if frame.sensor_type != SensorType::BayerColor {
        return Err(AcquisitionError::UnsupportedPixelFormat(format!(
            "{:?} frame cannot be debayered",
            frame.sensor_type
        )));
    }
    if !matches!(frame.samples, RawSamples::U16(_)) {
        return Err(AcquisitionError::UnsupportedPixelFormat(
            "Bayer input must be a 16-bit mosaic".to_string(),
        ));
    }
    if !(8..=16).contains(&frame.bits_per_sample) {
        return Err(AcquisitionError::UnsupportedPixelFormat(format!(
            "{} bits per sample in a 16-bit Bayer mosaic",
            frame.bits_per_sample
        )));
    }
    if frame.samples.len() < frame.pixel_count() {
        return Err(AcquisitionError::InvalidGeometry(format!(
            "{}x{} frame carries only {} samples",
            frame.width,
            frame.height,
            frame.samples.len()
        )));
    }
    Ok(())
}

/// Demosaics a validated Bayer frame into linear RGB.
pub fn demosaic(frame: &RawFrame<'_>, algorithm: DebayerAlgorithm) -> Result<RgbImageData> {
    check_bayer_input(frame)?;
    match algorithm {
        DebayerAlgorithm::Replication => Ok(ReplicationDebayer.process(frame)),
        DebayerAlgorithm::SmoothHue => Ok(SmoothHueDebayer.process(frame)),
        DebayerAlgorithm::AdaptiveSmoothHue => Ok(AdaptiveSmoothHueDebayer.process(frame)),
        DebayerAlgorithm::Bilinear => CpuDebayer.process(frame),
    }
}
