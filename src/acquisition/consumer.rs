use std::sync::Arc;

use crate::acquisition::session::SessionOutcome;
use crate::image_pipeline::ProcessedFrame;

/// Application-side receiver of acquisition events.
///
/// Callbacks run on the producer's delivery thread with no controller lock
/// held; they should return quickly. Frames are also queued in the
/// controller's [`FrameSink`](crate::acquisition::FrameSink), which the
/// consumer drains at its own pace.
pub trait FrameConsumer: Send + Sync {
    fn on_frame_ready(&self, frame: &Arc<ProcessedFrame>);

    /// The sink was full when a frame arrived.
    fn on_overflow(&self) {}

    /// Called exactly once per armed session that reached a terminal state.
    fn on_acquisition_finished(&self, _outcome: &SessionOutcome) {}
}

/// Consumer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl FrameConsumer for NullConsumer {
    fn on_frame_ready(&self, _frame: &Arc<ProcessedFrame>) {}
}
