//! Camera configuration: sensor geometry, region of interest and pipeline options.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::acquisition::sink::OverflowPolicy;
use crate::image_pipeline::{
    AcquisitionError, BayerPhase, PipelineConfig, PolarPhase, Result, SensorType, WhiteBalanceCoefficients,
};

/// Longest exposure accepted, one hour.
pub const MAX_EXPOSURE_MS: f64 = 3_600_000.0;
/// Longest extra wait a snap allows past the exposure.
pub const MAX_SNAP_SLACK_MS: u64 = 60_000;

/// Region of interest in unbinned sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Complete configuration of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Full sensor width in pixels
    pub sensor_width: usize,
    /// Full sensor height in pixels
    pub sensor_height: usize,
    pub max_binning: u32,
    pub sensor_type: SensorType,
    pub bits_per_sample: u32,
    pub bayer_phase: BayerPhase,
    pub polar_phase: PolarPhase,
    pub binning: u32,
    pub exposure_ms: f64,
    /// Added to the exposure to form the snap deadline
    pub snap_slack_ms: u64,
    pub sink_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// `None` means the full sensor
    pub roi: Option<Roi>,
    pub white_balance: WhiteBalanceCoefficients,
    pub pipeline: PipelineConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            sensor_width: 640,
            sensor_height: 480,
            max_binning: 4,
            sensor_type: SensorType::Monochrome,
            bits_per_sample: 12,
            bayer_phase: BayerPhase::Rggb,
            polar_phase: PolarPhase::Deg90,
            roi: None,
            binning: 1,
            exposure_ms: 10.0,
            snap_slack_ms: 500,
            sink_capacity: 16,
            overflow_policy: OverflowPolicy::HaltOnOverflow,
            white_balance: WhiteBalanceCoefficients::NEUTRAL,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl CameraConfig {
    pub fn builder() -> CameraConfigBuilder {
        CameraConfigBuilder::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AcquisitionError::ConfigLoad(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AcquisitionError::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| AcquisitionError::ConfigLoad(e.to_string()))
    }

    pub fn effective_roi(&self) -> Roi {
        self.roi.unwrap_or_else(|| Roi::full(self.sensor_width, self.sensor_height))
    }

    /// Size of the frames the sensor delivers after ROI and binning.
    pub fn frame_size(&self) -> (usize, usize) {
        let roi = self.effective_roi();
        let binning = self.binning.max(1) as usize;
        (roi.width / binning, roi.height / binning)
    }

    /// Clamped to `0..=MAX_EXPOSURE_MS`; NaN reads as zero.
    pub fn exposure(&self) -> Duration {
        Duration::try_from_secs_f64(self.exposure_ms.clamp(0.0, MAX_EXPOSURE_MS) / 1000.0).unwrap_or_default()
    }

    pub fn snap_deadline(&self) -> Duration {
        self.exposure() + Duration::from_millis(self.snap_slack_ms.min(MAX_SNAP_SLACK_MS))
    }

    /// Rejects configurations the pipeline or the sensor could not honor.
    pub fn validate(&self) -> Result<()> {
        if self.sensor_width == 0 || self.sensor_height == 0 {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "sensor size {}x{}",
                self.sensor_width, self.sensor_height
            )));
        }

        if !(1..=16).contains(&self.bits_per_sample) {
            return Err(AcquisitionError::UnsupportedPixelFormat(format!(
                "{} bits per sample",
                self.bits_per_sample
            )));
        }
        if self.sensor_type == SensorType::BayerColor && self.bits_per_sample < 8 {
            return Err(AcquisitionError::UnsupportedPixelFormat(format!(
                "Bayer sensors need 8 to 16 bits per sample, got {}",
                self.bits_per_sample
            )));
        }

        if self.binning == 0 || self.binning > self.max_binning {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "binning {} outside 1..={}",
                self.binning, self.max_binning
            )));
        }
        if self.sensor_type.is_mosaic() && self.binning != 1 {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "{:?} sensors cannot bin ({}x{})",
                self.sensor_type, self.binning, self.binning
            )));
        }

        let roi = self.effective_roi();
        if roi.width == 0 || roi.height == 0 {
            return Err(AcquisitionError::InvalidGeometry(format!("empty ROI {:?}", roi)));
        }
        if roi.x + roi.width > self.sensor_width || roi.y + roi.height > self.sensor_height {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "ROI {:?} exceeds sensor {}x{}",
                roi, self.sensor_width, self.sensor_height
            )));
        }
        if self.sensor_type.is_mosaic() && [roi.x, roi.y, roi.width, roi.height].iter().any(|v| v % 2 != 0) {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "ROI {:?} must be aligned to the 2x2 mosaic",
                roi
            )));
        }
        let (width, height) = self.frame_size();
        if width == 0 || height == 0 {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "ROI {:?} is smaller than the {}x binning",
                roi, self.binning
            )));
        }

        if !(0.0..=MAX_EXPOSURE_MS).contains(&self.exposure_ms) {
            return Err(AcquisitionError::InvalidConfig(format!(
                "exposure {} ms outside 0..={} ms",
                self.exposure_ms, MAX_EXPOSURE_MS
            )));
        }
        if self.snap_slack_ms > MAX_SNAP_SLACK_MS {
            return Err(AcquisitionError::InvalidConfig(format!(
                "snap slack {} ms exceeds {} ms",
                self.snap_slack_ms, MAX_SNAP_SLACK_MS
            )));
        }
        if self.sink_capacity == 0 {
            return Err(AcquisitionError::InvalidConfig("sink capacity must be at least 1".to_string()));
        }
        if !self.pipeline.wb_tolerance.is_finite() || self.pipeline.wb_tolerance < 0.0 {
            return Err(AcquisitionError::InvalidConfig(format!(
                "white-balance tolerance {}",
                self.pipeline.wb_tolerance
            )));
        }
        let wb = self.white_balance;
        WhiteBalanceCoefficients::new(wb.red_scale, wb.green_scale, wb.blue_scale)?;

        Ok(())
    }
}

/// Builder for CameraConfig
#[derive(Default)]
pub struct CameraConfigBuilder {
    sensor_size: Option<(usize, usize)>,
    max_binning: Option<u32>,
    sensor_type: Option<SensorType>,
    bits_per_sample: Option<u32>,
    bayer_phase: Option<BayerPhase>,
    polar_phase: Option<PolarPhase>,
    roi: Option<Option<Roi>>,
    binning: Option<u32>,
    exposure_ms: Option<f64>,
    snap_slack_ms: Option<u64>,
    sink_capacity: Option<usize>,
    overflow_policy: Option<OverflowPolicy>,
    white_balance: Option<WhiteBalanceCoefficients>,
    pipeline: Option<PipelineConfig>,
}

impl CameraConfigBuilder {
    pub fn sensor_size(mut self, width: usize, height: usize) -> Self {
        self.sensor_size = Some((width, height));
        self
    }

    pub fn max_binning(mut self, max_binning: u32) -> Self {
        self.max_binning = Some(max_binning);
        self
    }

    pub fn sensor_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = Some(sensor_type);
        self
    }

    pub fn bits_per_sample(mut self, bits: u32) -> Self {
        self.bits_per_sample = Some(bits);
        self
    }

    pub fn bayer_phase(mut self, phase: BayerPhase) -> Self {
        self.bayer_phase = Some(phase);
        self
    }

    pub fn polar_phase(mut self, phase: PolarPhase) -> Self {
        self.polar_phase = Some(phase);
        self
    }

    pub fn roi(mut self, roi: Option<Roi>) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn binning(mut self, binning: u32) -> Self {
        self.binning = Some(binning);
        self
    }

    pub fn exposure_ms(mut self, exposure_ms: f64) -> Self {
        self.exposure_ms = Some(exposure_ms);
        self
    }

    pub fn snap_slack_ms(mut self, slack_ms: u64) -> Self {
        self.snap_slack_ms = Some(slack_ms);
        self
    }

    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = Some(capacity);
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = Some(policy);
        self
    }

    pub fn white_balance(mut self, coefficients: WhiteBalanceCoefficients) -> Self {
        self.white_balance = Some(coefficients);
        self
    }

    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> CameraConfig {
        let default = CameraConfig::default();
        let (sensor_width, sensor_height) = self
            .sensor_size
            .unwrap_or((default.sensor_width, default.sensor_height));
        CameraConfig {
            sensor_width,
            sensor_height,
            max_binning: self.max_binning.unwrap_or(default.max_binning),
            sensor_type: self.sensor_type.unwrap_or(default.sensor_type),
            bits_per_sample: self.bits_per_sample.unwrap_or(default.bits_per_sample),
            bayer_phase: self.bayer_phase.unwrap_or(default.bayer_phase),
            polar_phase: self.polar_phase.unwrap_or(default.polar_phase),
            roi: self.roi.unwrap_or(default.roi),
            binning: self.binning.unwrap_or(default.binning),
            exposure_ms: self.exposure_ms.unwrap_or(default.exposure_ms),
            snap_slack_ms: self.snap_slack_ms.unwrap_or(default.snap_slack_ms),
            sink_capacity: self.sink_capacity.unwrap_or(default.sink_capacity),
            overflow_policy: self.overflow_policy.unwrap_or(default.overflow_policy),
            white_balance: self.white_balance.unwrap_or(default.white_balance),
            pipeline: self.pipeline.unwrap_or(default.pipeline),
        }
    }
}
