//! Pixel reconstruction pipeline
//!
//! Turns raw sensor frames (monochrome, Bayer mosaic or micro-polarizer
//! mosaic) into processed frames, with white-balance calibration for color
//! sensors.

pub mod common;
pub mod debayer;
pub mod pipeline;
pub mod polarization;
pub mod raw;
pub mod timing;
pub mod types;
pub mod white_balance;


pub use common::{AcquisitionError, Result};

pub use raw::{BayerPhase, Channel, PolarPhase, RawFrame, RawSamples, SensorType};

pub use debayer::{DebayerAlgorithm, RgbImageData};

pub use pipeline::PixelPipeline;
pub use polarization::PolarImageType;
pub use timing::{PipelineTimings, StepTiming, Timer};
pub use types::{PipelineConfig, PipelineConfigBuilder, PixelFormat, ProcessedFrame};
pub use white_balance::{WhiteBalanceCalibrator, WhiteBalanceCoefficients};
