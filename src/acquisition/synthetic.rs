//! Frame producer that synthesises frames on its own thread, for running the
//! acquisition stack without hardware.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::acquisition::controller::DeliveryOutcome;
use crate::acquisition::producer::{ArmRequest, FrameGeometry, FrameProducer};
use crate::image_pipeline::{AcquisitionError, Channel, RawFrame, RawSamples, Result, SensorType};

/// Polarizer angle, in degrees, of the synthetic polarized scene.
const SCENE_ANGLE_DEG: f64 = 30.0;
const SCENE_DOLP: f64 = 0.5;

/// Owned sample buffer of one synthetic frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl SampleBuffer {
    pub fn as_samples(&self) -> RawSamples<'_> {
        match self {
            Self::U8(data) => RawSamples::U8(data),
            Self::U16(data) => RawSamples::U16(data),
        }
    }
}

/// Borrows `buffer` as a raw frame of the given geometry.
pub fn raw_frame<'a>(geometry: &FrameGeometry, buffer: &'a SampleBuffer) -> RawFrame<'a> {
    RawFrame {
        width: geometry.width,
        height: geometry.height,
        bits_per_sample: geometry.bits_per_sample,
        sensor_type: geometry.sensor_type,
        bayer_phase: geometry.bayer_phase,
        polar_phase: geometry.polar_phase,
        samples: buffer.as_samples(),
    }
}

/// Builds frame `index` of the synthetic scene.
///
/// Monochrome sensors see a horizontal sine pattern whose phase advances with
/// every frame, Bayer sensors a uniform warm gray and polarized sensors a
/// partially polarized scene at a fixed angle.
pub fn synthesize(geometry: &FrameGeometry, index: u64) -> SampleBuffer {
    let max = f64::from((1u32 << geometry.bits_per_sample.min(16)) - 1);
    let (width, height) = (geometry.width, geometry.height);

    let values = (0..width * height).map(|i| {
        let (x, y) = (i % width, i / width);
        let level = match geometry.sensor_type {
            SensorType::Monochrome => {
                let period = (width as f64 / 4.0).max(1.0);
                let phase = index as f64 * 0.2;
                0.5 * (1.0 + (2.0 * PI * x as f64 / period + phase).sin())
            }
            SensorType::BayerColor => match geometry.bayer_phase.channel_at(x, y) {
                Channel::Red => 0.6,
                Channel::Green => 0.5,
                Channel::Blue => 0.3,
            },
            SensorType::Polarized => {
                let angle = f64::from(geometry.polar_phase.angle_at(x, y));
                let delta = (angle - SCENE_ANGLE_DEG).to_radians();
                0.4 * (1.0 + SCENE_DOLP * (2.0 * delta).cos())
            }
        };
        (level * max).round()
    });

    // Bayer frames always travel in a 16-bit container
    if geometry.bits_per_sample <= 8 && geometry.sensor_type != SensorType::BayerColor {
        SampleBuffer::U8(values.map(|v| v as u8).collect())
    } else {
        SampleBuffer::U16(values.map(|v| v as u16).collect())
    }
}

/// [`FrameProducer`] backed by [`synthesize`].
///
/// Each trigger spawns a worker that waits one exposure, then delivers a frame
/// every interval until the frame limit is reached, the controller stops
/// accepting frames or the producer is disarmed.
pub struct SyntheticProducer {
    armed: Mutex<Option<ArmRequest>>,
    /// Bumped by every arm and disarm; workers of an older generation stop.
    generation: Arc<AtomicU64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SyntheticProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticProducer {
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    fn run(request: ArmRequest, generation: Arc<AtomicU64>, own_generation: u64) {
        let mut index = 0u64;
        loop {
            let wait = if index == 0 { request.exposure } else { request.interval };
            thread::sleep(wait);
            if generation.load(Ordering::Acquire) != own_generation {
                debug!(session = request.delivery.session_id(), "Synthetic worker disarmed");
                return;
            }

            let buffer = synthesize(&request.geometry, index);
            let frame = raw_frame(&request.geometry, &buffer);
            trace!(session = request.delivery.session_id(), index, "Delivering synthetic frame");
            match request.delivery.deliver(&frame) {
                DeliveryOutcome::Accepted => {}
                outcome => {
                    debug!(?outcome, index, "Synthetic worker finished");
                    return;
                }
            }

            index += 1;
            if request.frame_limit.is_some_and(|limit| index >= limit) {
                return;
            }
        }
    }
}

impl FrameProducer for SyntheticProducer {
    fn arm(&self, request: ArmRequest) -> Result<()> {
        if request.geometry.width == 0 || request.geometry.height == 0 {
            return Err(AcquisitionError::ArmFailed(format!(
                "cannot synthesise {}x{} frames",
                request.geometry.width, request.geometry.height
            )));
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(
            session = request.delivery.session_id(),
            width = request.geometry.width,
            height = request.geometry.height,
            "Synthetic producer armed"
        );
        *self.armed.lock() = Some(request);
        Ok(())
    }

    fn trigger(&self) -> Result<()> {
        let Some(request) = self.armed.lock().take() else {
            return Err(AcquisitionError::InvalidState("synthetic producer is not armed".to_string()));
        };
        let generation = Arc::clone(&self.generation);
        let own_generation = generation.load(Ordering::Acquire);

        let handle = thread::Builder::new()
            .name("synthetic-producer".to_string())
            .spawn(move || Self::run(request, generation, own_generation))
            .map_err(|e| AcquisitionError::ArmFailed(format!("failed to spawn producer thread: {e}")))?;

        // the previous worker, if any, has already been invalidated by arm()
        if self.worker.lock().replace(handle).is_some() {
            trace!("Detached previous synthetic worker");
        }
        Ok(())
    }

    fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.armed.lock().take();
    }
}

impl Drop for SyntheticProducer {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Synthetic producer worker panicked");
            }
        }
    }
}
