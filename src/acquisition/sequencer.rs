use tracing::info;

use crate::acquisition::controller::{AcquisitionController, ControllerState};
use crate::acquisition::session::AcquisitionSession;
use crate::image_pipeline::{AcquisitionError, Result};

/// Number of frames a sequence should acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceLength {
    Count(u64),
    Unbounded,
}

/// Repeated acquisition on top of an [`AcquisitionController`].
#[derive(Debug, Clone)]
pub struct Sequencer {
    controller: AcquisitionController,
}

impl Sequencer {
    pub fn new(controller: AcquisitionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &AcquisitionController {
        &self.controller
    }

    /// Starts a sequence with the camera's configured overflow policy.
    pub fn start_sequence(&self, length: SequenceLength) -> Result<()> {
        self.start(Self::session_for(length))
    }

    pub fn start_sequence_with(&self, length: SequenceLength, stop_on_overflow: bool) -> Result<()> {
        self.start(Self::session_for(length).with_stop_on_overflow(stop_on_overflow))
    }

    pub fn start(&self, session: AcquisitionSession) -> Result<()> {
        if self.controller.is_busy() {
            return Err(AcquisitionError::AlreadyBusy);
        }
        info!(mode = ?session.mode, "Starting sequence");
        self.controller.arm(session)?;
        self.controller.trigger()
    }

    /// Stops a running sequence. Does nothing when no sequence is running.
    pub fn stop_sequence(&self) {
        if matches!(self.controller.state(), ControllerState::Sequencing | ControllerState::Armed) {
            info!(frames = self.controller.frames_acquired(), "Stopping sequence");
            self.controller.disarm();
        }
    }

    pub fn is_sequencing(&self) -> bool {
        self.controller.state() == ControllerState::Sequencing
    }

    pub fn frames_acquired(&self) -> u64 {
        self.controller.frames_acquired()
    }

    fn session_for(length: SequenceLength) -> AcquisitionSession {
        match length {
            SequenceLength::Count(count) => AcquisitionSession::finite(count),
            SequenceLength::Unbounded => AcquisitionSession::continuous(),
        }
    }
}
