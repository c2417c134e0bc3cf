//! Acquisition control
//!
//! Arms a frame producer, runs delivered frames through the pixel pipeline on
//! the delivery thread and queues the results in a bounded frame sink, under
//! single-shot (snap) or sequence semantics.

pub mod config;
pub mod consumer;
pub mod controller;
pub mod producer;
pub mod sequencer;
pub mod session;
pub mod sink;
pub mod synthetic;

#[cfg(test)]
mod tests;

pub use config::{CameraConfig, CameraConfigBuilder, Roi};
pub use consumer::{FrameConsumer, NullConsumer};
pub use controller::{AcquisitionController, AcquisitionStats, ControllerState, DeliveryOutcome, FrameDelivery};
pub use producer::{ArmRequest, FrameGeometry, FrameProducer};
pub use sequencer::{SequenceLength, Sequencer};
pub use session::{AcquisitionMode, AcquisitionSession, SessionOutcome};
pub use sink::{FrameSink, InsertOutcome, OverflowPolicy};
pub use synthetic::{SampleBuffer, SyntheticProducer};
