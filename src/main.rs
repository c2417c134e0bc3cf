use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use cam_acquisition_rs::acquisition::synthetic::{raw_frame, synthesize};
use cam_acquisition_rs::acquisition::{
    AcquisitionController, CameraConfig, FrameConsumer, FrameGeometry, SequenceLength, Sequencer, SessionOutcome,
    SyntheticProducer,
};
use cam_acquisition_rs::image_pipeline::{PixelPipeline, ProcessedFrame};
use cam_acquisition_rs::logger;

use tracing::{debug, info, warn};

struct LoggingConsumer;

impl FrameConsumer for LoggingConsumer {
    fn on_frame_ready(&self, frame: &Arc<ProcessedFrame>) {
        debug!(
            frame = frame.frame_number,
            width = frame.width,
            height = frame.height,
            format = ?frame.pixel_format,
            "Frame ready"
        );
    }

    fn on_overflow(&self) {
        warn!("Consumer fell behind, frame sink overflowed");
    }

    fn on_acquisition_finished(&self, outcome: &SessionOutcome) {
        info!(?outcome, "Acquisition finished");
    }
}

fn main() -> anyhow::Result<()> {
    logger::init();

    info!("Starting cam_acquisition...");

    let config = match std::env::args().nth(1) {
        Some(path) => CameraConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => CameraConfig::default(),
    };
    info!(
        sensor = ?config.sensor_type,
        bits = config.bits_per_sample,
        exposure_ms = config.exposure_ms,
        "Camera configured"
    );

    let geometry = FrameGeometry::from_config(&config);
    let pipeline = PixelPipeline::new(config.pipeline).with_coefficients(config.white_balance);
    let buffer = synthesize(&geometry, 0);
    let (_, timings) = pipeline.process_with_timings(&raw_frame(&geometry, &buffer))?;
    timings.log_summary();

    let controller = AcquisitionController::new(config, Arc::new(SyntheticProducer::new()), Arc::new(LoggingConsumer))?;

    controller.snap().context("snap failed")?;
    let sink = controller.sink();
    if let Some(frame) = sink.pop() {
        info!(width = frame.width, height = frame.height, bytes = frame.data.len(), "Snapped frame");
    }

    let sequencer = Sequencer::new(controller.clone());
    sequencer.start_sequence(SequenceLength::Count(10))?;
    if !controller.wait_idle(Duration::from_secs(10)) {
        sequencer.stop_sequence();
        bail!("sequence did not finish in time");
    }
    info!(frames = sequencer.frames_acquired(), queued = sink.len(), "Sequence complete");

    let stats = controller.stats();
    info!(
        sessions = stats.sessions_started,
        delivered = stats.frames_delivered,
        discarded = stats.frames_discarded,
        overflows = stats.overflow_events,
        "Acquisition statistics"
    );

    Ok(())
}
