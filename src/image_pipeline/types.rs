//! Processed frame and pipeline configuration types

use serde::{Deserialize, Serialize};

use crate::image_pipeline::debayer::DebayerAlgorithm;
use crate::image_pipeline::polarization::PolarImageType;

/// Pixel layout of a processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel
    Gray8,
    /// Two little-endian bytes per pixel
    Gray16,
    /// Four bytes per pixel in B, G, R, A order
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Gray16 => 2,
            Self::Bgra8 => 4,
        }
    }
}

/// Frame produced by the pixel pipeline. Immutable once handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFrame {
    pub width: usize,
    pub height: usize,
    pub bytes_per_pixel: usize,
    /// Significant bits per channel in `data`
    pub bits_per_sample: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    /// Position of the frame inside its acquisition session, starting at 0
    pub frame_number: u64,
}

impl ProcessedFrame {
    pub fn new(width: usize, height: usize, bits_per_sample: u32, pixel_format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel: pixel_format.bytes_per_pixel(),
            bits_per_sample,
            pixel_format,
            data,
            frame_number: 0,
        }
    }

    pub fn with_frame_number(mut self, frame_number: u64) -> Self {
        self.frame_number = frame_number;
        self
    }

    /// Value of a 16-bit gray pixel.
    pub fn gray16_at(&self, x: usize, y: usize) -> Option<u16> {
        if self.pixel_format != PixelFormat::Gray16 || x >= self.width {
            return None;
        }
        let i = (y * self.width + x) * 2;
        Some(u16::from_le_bytes([*self.data.get(i)?, *self.data.get(i + 1)?]))
    }

    /// `[b, g, r, a]` of a BGRA pixel.
    pub fn bgra_at(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if self.pixel_format != PixelFormat::Bgra8 || x >= self.width {
            return None;
        }
        let i = (y * self.width + x) * 4;
        self.data.get(i..i + 4)?.try_into().ok()
    }
}

/// Configuration of the pixel pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Demosaic algorithm for Bayer frames
    pub debayer_algorithm: DebayerAlgorithm,
    /// Image derived from polarized frames
    pub polar_image_type: PolarImageType,
    /// White-balance scale deviation from 1.0 above which calibration warns
    pub wb_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debayer_algorithm: DebayerAlgorithm::Replication,
            polar_image_type: PolarImageType::Intensity,
            wb_tolerance: 0.5,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for PipelineConfig
#[derive(Default)]
pub struct PipelineConfigBuilder {
    debayer_algorithm: Option<DebayerAlgorithm>,
    polar_image_type: Option<PolarImageType>,
    wb_tolerance: Option<f64>,
}

impl PipelineConfigBuilder {
    pub fn debayer_algorithm(mut self, algorithm: DebayerAlgorithm) -> Self {
        self.debayer_algorithm = Some(algorithm);
        self
    }

    pub fn polar_image_type(mut self, image_type: PolarImageType) -> Self {
        self.polar_image_type = Some(image_type);
        self
    }

    pub fn wb_tolerance(mut self, tolerance: f64) -> Self {
        self.wb_tolerance = Some(tolerance);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let default = PipelineConfig::default();
        PipelineConfig {
            debayer_algorithm: self.debayer_algorithm.unwrap_or(default.debayer_algorithm),
            polar_image_type: self.polar_image_type.unwrap_or(default.polar_image_type),
            wb_tolerance: self.wb_tolerance.unwrap_or(default.wb_tolerance),
        }
    }
}
