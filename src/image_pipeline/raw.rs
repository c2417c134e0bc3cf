//! Raw frame module
//!
//! Describes sensor frames as they arrive from the hardware layer.

pub mod types;

pub use types::{BayerPhase, Channel, PolarPhase, RawFrame, RawSamples, SensorType};
