use tracing::{instrument, trace};

use crate::image_pipeline::common::error::{AcquisitionError, Result};
use crate::image_pipeline::debayer::{self, RgbImageData};
use crate::image_pipeline::polarization::{self, PolarImage};
use crate::image_pipeline::raw::{RawFrame, RawSamples, SensorType};
use crate::image_pipeline::timing::PipelineTimings;
use crate::image_pipeline::types::{PipelineConfig, PixelFormat, ProcessedFrame};
use crate::image_pipeline::white_balance::{WhiteBalanceCalibrator, WhiteBalanceCoefficients};

/// Transforms raw sensor frames into processed frames.
///
/// The pipeline holds no per-frame state: the output depends only on the
/// frame, the configuration and the current white-balance coefficients.
#[derive(Debug, Clone, Default)]
pub struct PixelPipeline {
    config: PipelineConfig,
    coefficients: WhiteBalanceCoefficients,
}

impl PixelPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            coefficients: WhiteBalanceCoefficients::NEUTRAL,
        }
    }

    pub fn with_coefficients(mut self, coefficients: WhiteBalanceCoefficients) -> Self {
        self.coefficients = coefficients;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn coefficients(&self) -> WhiteBalanceCoefficients {
        self.coefficients
    }

    /// Calibrator matching this pipeline's debayer algorithm and tolerance.
    pub fn calibrator(&self) -> WhiteBalanceCalibrator {
        WhiteBalanceCalibrator::new(self.config.debayer_algorithm, self.config.wb_tolerance)
    }

    pub fn process(&self, frame: &RawFrame<'_>) -> Result<ProcessedFrame> {
        let mut timings = PipelineTimings::new();
        self.run(frame, &mut timings)
    }

    pub fn process_with_timings(&self, frame: &RawFrame<'_>) -> Result<(ProcessedFrame, PipelineTimings)> {
        let mut timings = PipelineTimings::new();
        let processed = self.run(frame, &mut timings)?;
        Ok((processed, timings))
    }

    #[instrument(level = "trace", skip_all, fields(sensor = ?frame.sensor_type, width = frame.width, height = frame.height))]
    fn run(&self, frame: &RawFrame<'_>, timings: &mut PipelineTimings) -> Result<ProcessedFrame> {
        check_geometry(frame)?;

        match frame.sensor_type {
            SensorType::Monochrome => timings.time("copy_monochrome", || copy_monochrome(frame)),
            SensorType::BayerColor => {
                let rgb = timings.time("demosaic", || debayer::demosaic(frame, self.config.debayer_algorithm))?;
                Ok(timings.time("pack_bgra", || pack_bgra(&rgb, self.coefficients)))
            }
            SensorType::Polarized => {
                let image = timings.time("decode_polarization", || {
                    polarization::decode(frame, self.config.polar_image_type)
                })?;
                Ok(timings.time("pack_gray16", || pack_polar(image)))
            }
        }
    }
}

fn check_geometry(frame: &RawFrame<'_>) -> Result<()> {
    if frame.width == 0 || frame.height == 0 {
        return Err(AcquisitionError::InvalidGeometry(format!(
            "empty frame {}x{}",
            frame.width, frame.height
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

fn copy_monochrome(frame: &RawFrame<'_>) -> Result<ProcessedFrame> {
    let bits = frame.bits_per_sample;
    if bits == 0 || bits > frame.samples.container_bits() {
        return Err(AcquisitionError::UnsupportedPixelFormat(format!(
            "{} bits per sample in a {}-bit container",
            bits,
            frame.samples.container_bits()
        )));
    }

    let count = frame.pixel_count();
    let processed = match frame.samples {
        RawSamples::U8(data) => ProcessedFrame::new(frame.width, frame.height, bits, PixelFormat::Gray8, data[..count].to_vec()),
        RawSamples::U16(data) if bits <= 8 => {
            let bytes = data[..count].iter().map(|&v| v.min(u16::from(u8::MAX)) as u8).collect();
            ProcessedFrame::new(frame.width, frame.height, bits, PixelFormat::Gray8, bytes)
        }
        RawSamples::U16(data) => {
            let bytes = data[..count].iter().flat_map(|v| v.to_le_bytes()).collect();
            ProcessedFrame::new(frame.width, frame.height, bits, PixelFormat::Gray16, bytes)
        }
    };
    trace!(format = ?processed.pixel_format, "Copied monochrome frame");
    Ok(processed)
}

/// Applies white-balance scales, truncates to 8 bits and interleaves as BGRA.
pub fn pack_bgra(rgb: &RgbImageData, coefficients: WhiteBalanceCoefficients) -> ProcessedFrame {
    let shift = rgb.bits_per_sample.saturating_sub(8);
    let scale = |value: u16, gain: f64| -> u8 { (gain * f64::from(value >> shift)).clamp(0.0, 255.0) as u8 };

    let mut bytes = Vec::with_capacity(rgb.width * rgb.height * 4);
    for px in rgb.data.chunks_exact(3) {
        bytes.push(scale(px[2], coefficients.blue_scale));
        bytes.push(scale(px[1], coefficients.green_scale));
        bytes.push(scale(px[0], coefficients.red_scale));
        bytes.push(0);
    }

    ProcessedFrame::new(rgb.width, rgb.height, 8, PixelFormat::Bgra8, bytes)
}

fn pack_polar(image: PolarImage) -> ProcessedFrame {
    let bytes = image.data.iter().flat_map(|v| v.to_le_bytes()).collect();
    ProcessedFrame::new(image.width, image.height, image.bits_per_sample, PixelFormat::Gray16, bytes)
}
