use std::time::Duration;

use crate::acquisition::config::{CameraConfig, Roi};
use crate::acquisition::controller::FrameDelivery;
use crate::image_pipeline::{AcquisitionError, BayerPhase, PolarPhase, RawFrame, Result, SensorType};

/// Shape of the frames a producer is expected to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub roi: Roi,
    pub binning: u32,
    /// Delivered width after binning
    pub width: usize,
    /// Delivered height after binning
    pub height: usize,
    pub bits_per_sample: u32,
    pub sensor_type: SensorType,
    pub bayer_phase: BayerPhase,
    pub polar_phase: PolarPhase,
}

impl FrameGeometry {
    pub fn from_config(config: &CameraConfig) -> Self {
        let (width, height) = config.frame_size();
        Self {
            roi: config.effective_roi(),
            binning: config.binning,
            width,
            height,
            bits_per_sample: config.bits_per_sample,
            sensor_type: config.sensor_type,
            bayer_phase: config.bayer_phase,
            polar_phase: config.polar_phase,
        }
    }

    /// Checks a delivered frame against the armed shape and pixel format.
    pub fn check_frame(&self, frame: &RawFrame<'_>) -> Result<()> {
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "delivered {}x{} frame, armed for {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if frame.sensor_type != self.sensor_type || frame.bits_per_sample != self.bits_per_sample {
            return Err(AcquisitionError::UnsupportedPixelFormat(format!(
                "delivered {:?} frame with {} bits, armed for {:?} with {} bits",
                frame.sensor_type, frame.bits_per_sample, self.sensor_type, self.bits_per_sample
            )));
        }
        Ok(())
    }
}

/// Everything a producer needs to prepare one acquisition.
#[derive(Debug, Clone)]
pub struct ArmRequest {
    /// Entry point for frames of this session
    pub delivery: FrameDelivery,
    /// `None` for continuous acquisition
    pub frame_limit: Option<u64>,
    pub geometry: FrameGeometry,
    pub exposure: Duration,
    /// Effective spacing between frames, at least `exposure`
    pub interval: Duration,
}

/// Hardware side of an acquisition.
///
/// The producer delivers frames through [`FrameDelivery::deliver`] from a
/// thread of its own, in capture order, and must not retain a frame's
/// buffer after that call returns.
pub trait FrameProducer: Send + Sync {
    /// Prepares the hardware. Must not deliver frames before `trigger`.
    fn arm(&self, request: ArmRequest) -> Result<()>;

    fn trigger(&self) -> Result<()>;

    /// Stops delivery. Non-blocking and idempotent; may be called from the
    /// delivery thread itself.
    fn disarm(&self);
}
