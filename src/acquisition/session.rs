use std::time::Duration;

use crate::acquisition::sink::OverflowPolicy;
use crate::image_pipeline::{AcquisitionError, Result};

/// How many frames an acquisition produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// One frame; the caller blocks until it arrives or the deadline passes
    Snap,
    FiniteSequence(u64),
    ContinuousSequence,
}

/// Parameters of one acquisition, fixed when the controller is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSession {
    pub mode: AcquisitionMode,
    /// `None` inherits the camera's configured overflow policy
    pub stop_on_overflow: Option<bool>,
    /// Requested spacing between frames; never shorter than the exposure
    pub interval: Option<Duration>,
}

impl AcquisitionSession {
    pub fn new(mode: AcquisitionMode) -> Self {
        Self {
            mode,
            stop_on_overflow: None,
            interval: None,
        }
    }

    pub fn snap() -> Self {
        Self::new(AcquisitionMode::Snap)
    }

    pub fn finite(count: u64) -> Self {
        Self::new(AcquisitionMode::FiniteSequence(count))
    }

    pub fn continuous() -> Self {
        Self::new(AcquisitionMode::ContinuousSequence)
    }

    pub fn with_stop_on_overflow(mut self, stop: bool) -> Self {
        self.stop_on_overflow = Some(stop);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn is_snap(&self) -> bool {
        self.mode == AcquisitionMode::Snap
    }

    /// Number of frames after which the session completes on its own.
    pub fn frame_limit(&self) -> Option<u64> {
        match self.mode {
            AcquisitionMode::Snap => Some(1),
            AcquisitionMode::FiniteSequence(count) => Some(count),
            AcquisitionMode::ContinuousSequence => None,
        }
    }

    pub fn overflow_policy(&self, configured: OverflowPolicy) -> OverflowPolicy {
        match self.stop_on_overflow {
            Some(true) => OverflowPolicy::HaltOnOverflow,
            Some(false) => OverflowPolicy::DropAndContinue,
            None => configured,
        }
    }

    pub fn effective_interval(&self, exposure: Duration) -> Duration {
        self.interval.map_or(exposure, |interval| interval.max(exposure))
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode == AcquisitionMode::FiniteSequence(0) {
            return Err(AcquisitionError::InvalidConfig(
                "a finite sequence needs at least one frame".to_string(),
            ));
        }
        Ok(())
    }
}

/// How an acquisition session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The requested frames were all delivered
    Completed,
    /// Disarmed or cancelled before completion
    Cancelled,
    /// A snap deadline elapsed without a frame
    TimedOut,
    /// The sink was full under `HaltOnOverflow`
    Overflowed,
    Failed(AcquisitionError),
}

impl SessionOutcome {
    /// Error a blocked snap caller receives for this outcome.
    pub fn into_result(self, timeout: Duration, capacity: usize) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Cancelled => Err(AcquisitionError::Cancelled),
            Self::TimedOut => Err(AcquisitionError::Timeout(timeout.as_millis() as u64)),
            Self::Overflowed => Err(AcquisitionError::BufferOverflow(capacity)),
            Self::Failed(err) => Err(err),
        }
    }
}
