//! Acquisition state machine.
//!
//! ```text
//! Idle -> Armed -> Capturing  -> Idle   (snap, caller blocks)
//! Idle -> Armed -> Sequencing -> Idle   (sequence, asynchronous)
//! ```
//!
//! Controller state lives behind one mutex. Frames are processed on the
//! producer's delivery thread with that mutex released; the session is
//! re-checked before the result is queued, so a frame that races a
//! `disarm()` is discarded instead of being inserted after cancellation.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::acquisition::config::{CameraConfig, Roi};
use crate::acquisition::consumer::FrameConsumer;
use crate::acquisition::producer::{ArmRequest, FrameGeometry, FrameProducer};
use crate::acquisition::session::{AcquisitionSession, SessionOutcome};
use crate::acquisition::sink::{FrameSink, InsertOutcome, OverflowPolicy};
use crate::image_pipeline::{
    AcquisitionError, BayerPhase, DebayerAlgorithm, PixelPipeline, PolarImageType, PolarPhase, RawFrame, Result,
    SensorType, WhiteBalanceCoefficients,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Armed,
    Capturing,
    Sequencing,
}

/// What happened to a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued; the session continues
    Accepted,
    /// Queued; it was the last frame of the session
    Completed,
    /// The session is no longer capturing; the frame was dropped silently
    Discarded,
    /// The frame ended the session with an error (geometry, pipeline, overflow)
    Rejected,
}

/// Counters over the lifetime of a controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionStats {
    pub sessions_started: u64,
    pub frames_delivered: u64,
    pub frames_discarded: u64,
    pub backlog_frames_dropped: u64,
    pub overflow_events: u64,
    pub terminal_transitions: u64,
    pub last_outcome: Option<SessionOutcome>,
}

struct ActiveSession {
    id: u64,
    session: AcquisitionSession,
    frames_remaining: Option<u64>,
    next_frame_number: u64,
    geometry: FrameGeometry,
    recalibrate_white_balance: bool,
}

struct Finished {
    session_id: u64,
    outcome: SessionOutcome,
}

struct Core {
    state: ControllerState,
    next_session_id: u64,
    active: Option<ActiveSession>,
    in_flight: usize,
    last_finished: Option<(u64, SessionOutcome)>,
    frames_in_session: u64,
    config: CameraConfig,
    sink: Arc<FrameSink>,
    wb_recalibration_pending: bool,
    stats: AcquisitionStats,
}

impl Core {
    fn is_current(&self, session_id: u64) -> bool {
        self.active.as_ref().is_some_and(|active| active.id == session_id)
    }

    /// Idle with no delivery still running on a producer thread.
    fn is_quiescent(&self) -> bool {
        self.state == ControllerState::Idle && self.in_flight == 0
    }

    fn accepts(&self, session_id: u64) -> bool {
        matches!(self.state, ControllerState::Capturing | ControllerState::Sequencing) && self.is_current(session_id)
    }

    fn transition(&mut self, to: ControllerState) {
        debug!(from = ?self.state, to = ?to, "State transition");
        self.state = to;
    }

    /// The single terminal transition of a session. Returns `None` when the
    /// session already ended.
    fn finish(&mut self, outcome: SessionOutcome) -> Option<Finished> {
        let active = self.active.take()?;
        if active.recalibrate_white_balance {
            // ended before its first frame; keep the request for the next session
            self.wb_recalibration_pending = true;
        }
        self.transition(ControllerState::Idle);
        self.stats.terminal_transitions += 1;
        self.stats.last_outcome = Some(outcome.clone());
        self.last_finished = Some((active.id, outcome.clone()));
        Some(Finished {
            session_id: active.id,
            outcome,
        })
    }
}

struct Shared {
    core: Mutex<Core>,
    changed: Condvar,
    pipeline: RwLock<Arc<PixelPipeline>>,
    producer: Arc<dyn FrameProducer>,
    consumer: Arc<dyn FrameConsumer>,
}

/// Decrements the in-flight count when a delivery returns.
struct InFlightGuard<'a> {
    shared: &'a Shared,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.shared.core.lock().in_flight -= 1;
        self.shared.changed.notify_all();
    }
}

impl Shared {
    /// Runs the callbacks of a terminal transition. Must be called with the
    /// core lock released.
    fn report(&self, finished: Option<Finished>) {
        if let Some(finished) = finished {
            self.producer.disarm();
            info!(session = finished.session_id, outcome = ?finished.outcome, "Acquisition finished");
            self.consumer.on_acquisition_finished(&finished.outcome);
        }
        self.changed.notify_all();
    }

    fn fail_session(&self, session_id: u64, err: AcquisitionError) {
        let finished = {
            let mut core = self.core.lock();
            if core.is_current(session_id) {
                core.finish(SessionOutcome::Failed(err))
            } else {
                None
            }
        };
        self.report(finished);
    }

    fn deliver(&self, session_id: u64, frame: &RawFrame<'_>) -> DeliveryOutcome {
        let (sink, frame_number, recalibrate) = {
            let mut core = self.core.lock();
            if !core.accepts(session_id) {
                core.stats.frames_discarded += 1;
                debug!(session = session_id, state = ?core.state, "Discarding frame delivered outside an active capture");
                return DeliveryOutcome::Discarded;
            }

            let checked = match core.active.as_ref() {
                Some(active) => active.geometry.check_frame(frame),
                None => return DeliveryOutcome::Discarded,
            };
            if let Err(err) = checked {
                error!(%err, "Delivered frame does not match the armed geometry, stopping acquisition");
                let finished = core.finish(SessionOutcome::Failed(err));
                drop(core);
                self.report(finished);
                return DeliveryOutcome::Rejected;
            }

            let Some(active) = core.active.as_mut() else {
                return DeliveryOutcome::Discarded;
            };
            let frame_number = active.next_frame_number;
            active.next_frame_number += 1;
            let recalibrate = std::mem::take(&mut active.recalibrate_white_balance);
            core.in_flight += 1;
            (Arc::clone(&core.sink), frame_number, recalibrate)
        };
        let _in_flight = InFlightGuard { shared: self };

        let mut pipeline = self.pipeline.read().clone();
        let calibrated = if recalibrate {
            calibrated_pipeline(&pipeline, frame)
        } else {
            None
        };
        if let Some(calibrated) = &calibrated {
            pipeline = Arc::clone(calibrated);
        }

        let processed = match pipeline.process(frame) {
            Ok(processed) => Arc::new(processed.with_frame_number(frame_number)),
            Err(err) => {
                error!(%err, frame = frame_number, "Pixel pipeline failed, stopping acquisition");
                self.fail_session(session_id, err);
                return DeliveryOutcome::Rejected;
            }
        };

        let mut backlog_dropped = false;
        let (outcome, finished) = {
            let mut core = self.core.lock();
            if !core.accepts(session_id) {
                core.stats.frames_discarded += 1;
                if calibrated.is_some() {
                    core.wb_recalibration_pending = true;
                }
                debug!(session = session_id, frame = frame_number, "Discarding late frame after cancellation");
                return DeliveryOutcome::Discarded;
            }

            if let Some(calibrated) = &calibrated {
                let mut shared = self.pipeline.write();
                *shared = Arc::new((**shared).clone().with_coefficients(calibrated.coefficients()));
            }

            match sink.insert_shared(Arc::clone(&processed)) {
                Ok(InsertOutcome::Queued) => {}
                Ok(InsertOutcome::DroppedBacklog(dropped)) => {
                    core.stats.backlog_frames_dropped += dropped as u64;
                    core.stats.overflow_events += 1;
                    backlog_dropped = true;
                }
                Err(err) => {
                    core.stats.overflow_events += 1;
                    error!(%err, session = session_id, frame = frame_number, "Frame sink full, halting acquisition");
                    let finished = core.finish(SessionOutcome::Overflowed);
                    drop(core);
                    self.consumer.on_overflow();
                    self.report(finished);
                    return DeliveryOutcome::Rejected;
                }
            }

            core.stats.frames_delivered += 1;
            core.frames_in_session += 1;

            let last = core
                .active
                .as_mut()
                .and_then(|active| active.frames_remaining.as_mut())
                .is_some_and(|remaining| {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                });

            if last {
                (DeliveryOutcome::Completed, core.finish(SessionOutcome::Completed))
            } else {
                (DeliveryOutcome::Accepted, None)
            }
        };

        if backlog_dropped {
            self.consumer.on_overflow();
        }
        self.consumer.on_frame_ready(&processed);
        self.report(finished);
        outcome
    }
}

/// Calibrates on the first frame of a session. The result is only published
/// once that frame is accepted, so a discarded frame never changes the
/// coefficients.
fn calibrated_pipeline(current: &PixelPipeline, frame: &RawFrame<'_>) -> Option<Arc<PixelPipeline>> {
    match current.calibrator().calibrate(frame) {
        Ok(coefficients) => Some(Arc::new(current.clone().with_coefficients(coefficients))),
        Err(err) => {
            warn!(%err, "White balance recalibration failed, keeping previous coefficients");
            None
        }
    }
}

/// Entry point handed to a [`FrameProducer`] for one session.
#[derive(Clone)]
pub struct FrameDelivery {
    shared: Weak<Shared>,
    session_id: u64,
}

impl fmt::Debug for FrameDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDelivery")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl FrameDelivery {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Processes `frame` on the calling thread and queues the result. The
    /// frame's buffer is not retained after this returns.
    pub fn deliver(&self, frame: &RawFrame<'_>) -> DeliveryOutcome {
        match self.shared.upgrade() {
            Some(shared) => shared.deliver(self.session_id, frame),
            None => DeliveryOutcome::Discarded,
        }
    }

    /// Whether frames delivered now would be accepted.
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.core.lock().accepts(self.session_id))
    }
}

/// Orchestrates producer, pixel pipeline and sink for one camera.
#[derive(Clone)]
pub struct AcquisitionController {
    shared: Arc<Shared>,
}

impl fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("state", &self.state())
            .finish()
    }
}

impl AcquisitionController {
    pub fn new(
        config: CameraConfig,
        producer: Arc<dyn FrameProducer>,
        consumer: Arc<dyn FrameConsumer>,
    ) -> Result<Self> {
        config.validate()?;
        let sink = Arc::new(FrameSink::new(config.sink_capacity, config.overflow_policy)?);
        let pipeline = PixelPipeline::new(config.pipeline).with_coefficients(config.white_balance);

        let (width, height) = config.frame_size();
        info!(sensor = ?config.sensor_type, width, height, bits = config.bits_per_sample, "Acquisition controller ready");

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    state: ControllerState::Idle,
                    next_session_id: 0,
                    active: None,
                    in_flight: 0,
                    last_finished: None,
                    frames_in_session: 0,
                    config,
                    sink,
                    wb_recalibration_pending: false,
                    stats: AcquisitionStats::default(),
                }),
                changed: Condvar::new(),
                pipeline: RwLock::new(Arc::new(pipeline)),
                producer,
                consumer,
            }),
        })
    }

    pub fn state(&self) -> ControllerState {
        self.shared.core.lock().state
    }

    pub fn is_busy(&self) -> bool {
        self.state() != ControllerState::Idle
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.shared.core.lock().stats.clone()
    }

    /// Frames queued by the current, or most recent, session.
    pub fn frames_acquired(&self) -> u64 {
        self.shared.core.lock().frames_in_session
    }

    pub fn sink(&self) -> Arc<FrameSink> {
        Arc::clone(&self.shared.core.lock().sink)
    }

    pub fn config(&self) -> CameraConfig {
        let mut config = self.shared.core.lock().config.clone();
        config.white_balance = self.white_balance();
        config
    }

    #[instrument(skip_all, fields(mode = ?session.mode))]
    pub fn arm(&self, session: AcquisitionSession) -> Result<()> {
        session.validate()?;

        let (request, session_id) = {
            let mut core = self.shared.core.lock();
            // a delivery still in flight has not yet disarmed the producer
            if core.state != ControllerState::Idle || core.in_flight > 0 {
                return Err(AcquisitionError::AlreadyBusy);
            }

            let policy = session.overflow_policy(core.config.overflow_policy);
            core.sink.set_policy(policy);

            core.next_session_id += 1;
            let session_id = core.next_session_id;
            let geometry = FrameGeometry::from_config(&core.config);
            let exposure = core.config.exposure();
            let recalibrate = std::mem::take(&mut core.wb_recalibration_pending);

            core.active = Some(ActiveSession {
                id: session_id,
                session,
                frames_remaining: session.frame_limit(),
                next_frame_number: 0,
                geometry,
                recalibrate_white_balance: recalibrate,
            });
            core.frames_in_session = 0;
            core.stats.sessions_started += 1;
            core.transition(ControllerState::Armed);

            let request = ArmRequest {
                delivery: FrameDelivery {
                    shared: Arc::downgrade(&self.shared),
                    session_id,
                },
                frame_limit: session.frame_limit(),
                geometry,
                exposure,
                interval: session.effective_interval(exposure),
            };
            (request, session_id)
        };

        if let Err(err) = self.shared.producer.arm(request) {
            {
                let mut core = self.shared.core.lock();
                if core.is_current(session_id) {
                    if core.active.take().is_some_and(|active| active.recalibrate_white_balance) {
                        core.wb_recalibration_pending = true;
                    }
                    core.transition(ControllerState::Idle);
                }
            }
            self.shared.changed.notify_all();
            warn!(%err, "Producer could not be armed");
            return Err(match err {
                AcquisitionError::ArmFailed(_) => err,
                other => AcquisitionError::ArmFailed(other.to_string()),
            });
        }

        if !self.shared.core.lock().is_current(session_id) {
            // disarmed while the producer was arming
            self.shared.producer.disarm();
            return Err(AcquisitionError::Cancelled);
        }

        info!(session = session_id, policy = ?self.sink().policy(), "Armed");
        Ok(())
    }

    /// Starts the armed session. For a snap, blocks until the frame has been
    /// delivered or the deadline (exposure plus slack) passes.
    pub fn trigger(&self) -> Result<()> {
        let (session_id, is_snap, timeout, capacity) = {
            let mut core = self.shared.core.lock();
            if core.state != ControllerState::Armed {
                return Err(AcquisitionError::InvalidState(format!(
                    "trigger requires an armed controller, state is {:?}",
                    core.state
                )));
            }
            let Some(active) = core.active.as_ref() else {
                return Err(AcquisitionError::InvalidState("no armed session".to_string()));
            };
            let (session_id, is_snap) = (active.id, active.session.is_snap());
            core.transition(if is_snap {
                ControllerState::Capturing
            } else {
                ControllerState::Sequencing
            });
            (session_id, is_snap, core.config.snap_deadline(), core.sink.capacity())
        };

        let deadline = Instant::now() + timeout;
        if let Err(err) = self.shared.producer.trigger() {
            error!(%err, session = session_id, "Producer trigger failed");
            self.shared.fail_session(session_id, err.clone());
            return Err(err);
        }

        if !is_snap {
            info!(session = session_id, "Sequence started");
            return Ok(());
        }
        self.wait_for_snap(session_id, deadline, timeout, capacity)
    }

    fn wait_for_snap(&self, session_id: u64, deadline: Instant, timeout: Duration, capacity: usize) -> Result<()> {
        let mut core = self.shared.core.lock();
        loop {
            let outcome = core
                .last_finished
                .as_ref()
                .filter(|(id, _)| *id == session_id)
                .map(|(_, outcome)| outcome.clone());
            if let Some(outcome) = outcome {
                if core.in_flight == 0 {
                    return outcome.into_result(timeout, capacity);
                }
                self.shared.changed.wait(&mut core);
                continue;
            }
            if !core.is_current(session_id) {
                return Err(AcquisitionError::Cancelled);
            }

            if self.shared.changed.wait_until(&mut core, deadline).timed_out() && core.is_current(session_id) {
                warn!(
                    session = session_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Snap timed out waiting for a frame"
                );
                let finished = core.finish(SessionOutcome::TimedOut);
                drop(core);
                self.shared.report(finished);
                return Err(AcquisitionError::Timeout(timeout.as_millis() as u64));
            }
        }
    }

    /// Arms and triggers a single frame.
    pub fn snap(&self) -> Result<()> {
        self.arm(AcquisitionSession::snap())?;
        self.trigger()
    }

    /// Returns to Idle from any state. Safe to call concurrently with frame
    /// delivery and when already Idle.
    pub fn disarm(&self) {
        let finished = {
            let mut core = self.shared.core.lock();
            if core.state == ControllerState::Idle {
                None
            } else {
                info!(state = ?core.state, "Disarming");
                core.finish(SessionOutcome::Cancelled)
            }
        };
        self.shared.report(finished);
    }

    pub fn cancel(&self) {
        self.disarm();
    }

    /// Blocks until the controller is Idle with no delivery in progress.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut core = self.shared.core.lock();
        while core.state != ControllerState::Idle || core.in_flight > 0 {
            if self.shared.changed.wait_until(&mut core, deadline).timed_out() {
                return core.state == ControllerState::Idle && core.in_flight == 0;
            }
        }
        true
    }

    fn update_config(&self, setting: &'static str, update: impl FnOnce(&mut CameraConfig)) -> Result<()> {
        let mut core = self.shared.core.lock();
        if !core.is_quiescent() {
            warn!(setting, state = ?core.state, in_flight = core.in_flight, "Rejected configuration change while busy");
            return Err(AcquisitionError::AlreadyBusy);
        }

        let mut candidate = core.config.clone();
        update(&mut candidate);
        candidate.validate()?;

        if candidate.sink_capacity != core.config.sink_capacity {
            core.sink = Arc::new(FrameSink::new(candidate.sink_capacity, candidate.overflow_policy)?);
        }
        if candidate.pipeline != core.config.pipeline {
            let mut pipeline = self.shared.pipeline.write();
            let coefficients = pipeline.coefficients();
            *pipeline = Arc::new(PixelPipeline::new(candidate.pipeline).with_coefficients(coefficients));
        }

        debug!(setting, "Configuration updated");
        core.config = candidate;
        Ok(())
    }

    pub fn set_roi(&self, x: usize, y: usize, width: usize, height: usize) -> Result<()> {
        self.update_config("roi", |config| config.roi = Some(Roi::new(x, y, width, height)))
    }

    pub fn clear_roi(&self) -> Result<()> {
        self.update_config("roi", |config| config.roi = None)
    }

    pub fn set_binning(&self, binning: u32) -> Result<()> {
        self.update_config("binning", |config| config.binning = binning)
    }

    pub fn set_sensor_type(&self, sensor_type: SensorType, bits_per_sample: u32) -> Result<()> {
        self.update_config("sensor_type", |config| {
            config.sensor_type = sensor_type;
            config.bits_per_sample = bits_per_sample;
        })
    }

    pub fn set_bayer_phase(&self, phase: BayerPhase) -> Result<()> {
        self.update_config("bayer_phase", |config| config.bayer_phase = phase)
    }

    pub fn set_polar_phase(&self, phase: PolarPhase) -> Result<()> {
        self.update_config("polar_phase", |config| config.polar_phase = phase)
    }

    pub fn set_exposure(&self, exposure_ms: f64) -> Result<()> {
        self.update_config("exposure", |config| config.exposure_ms = exposure_ms)
    }

    pub fn set_debayer_algorithm(&self, algorithm: DebayerAlgorithm) -> Result<()> {
        self.update_config("debayer_algorithm", |config| config.pipeline.debayer_algorithm = algorithm)
    }

    pub fn set_polar_image_type(&self, image_type: PolarImageType) -> Result<()> {
        self.update_config("polar_image_type", |config| config.pipeline.polar_image_type = image_type)
    }

    pub fn set_sink_capacity(&self, capacity: usize) -> Result<()> {
        self.update_config("sink_capacity", |config| config.sink_capacity = capacity)
    }

    /// Takes effect at the next `arm()`; a running session keeps its policy.
    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        let mut core = self.shared.core.lock();
        core.config.overflow_policy = policy;
        if core.state == ControllerState::Idle {
            core.sink.set_policy(policy);
        }
        debug!(?policy, "Overflow policy updated");
    }

    /// Queues a white-balance calibration on the first frame of the next
    /// session.
    pub fn request_white_balance_recalibration(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.config.sensor_type != SensorType::BayerColor {
            return Err(AcquisitionError::UnsupportedPixelFormat(format!(
                "white balance needs a Bayer sensor, configured for {:?}",
                core.config.sensor_type
            )));
        }
        core.wb_recalibration_pending = true;
        info!("White balance recalibration queued for the next capture");
        Ok(())
    }

    pub fn white_balance_recalibration_pending(&self) -> bool {
        let core = self.shared.core.lock();
        core.wb_recalibration_pending || core.active.as_ref().is_some_and(|active| active.recalibrate_white_balance)
    }

    /// Calibrates from a reference frame right away. Idle only.
    pub fn calibrate_white_balance(&self, frame: &RawFrame<'_>) -> Result<WhiteBalanceCoefficients> {
        let (calibrator, sessions_before) = {
            let core = self.shared.core.lock();
            if !core.is_quiescent() {
                return Err(AcquisitionError::AlreadyBusy);
            }
            (self.shared.pipeline.read().calibrator(), core.next_session_id)
        };

        let coefficients = calibrator.calibrate(frame)?;
        self.commit_white_balance(coefficients, Some(sessions_before))?;
        Ok(coefficients)
    }

    pub fn set_white_balance(&self, coefficients: WhiteBalanceCoefficients) -> Result<()> {
        let checked = WhiteBalanceCoefficients::new(
            coefficients.red_scale,
            coefficients.green_scale,
            coefficients.blue_scale,
        )?;
        self.commit_white_balance(checked, None)
    }

    pub fn reset_white_balance(&self) -> Result<()> {
        self.commit_white_balance(WhiteBalanceCoefficients::NEUTRAL, None)
    }

    pub fn white_balance(&self) -> WhiteBalanceCoefficients {
        self.shared.pipeline.read().coefficients()
    }

    /// `sessions_before` rejects the commit if a session was armed after the
    /// coefficients were computed.
    fn commit_white_balance(&self, coefficients: WhiteBalanceCoefficients, sessions_before: Option<u64>) -> Result<()> {
        let core = self.shared.core.lock();
        if !core.is_quiescent() || sessions_before.is_some_and(|n| n != core.next_session_id) {
            return Err(AcquisitionError::AlreadyBusy);
        }
        let mut pipeline = self.shared.pipeline.write();
        *pipeline = Arc::new((**pipeline).clone().with_coefficients(coefficients));
        info!(
            r_scale = coefficients.red_scale,
            g_scale = coefficients.green_scale,
            b_scale = coefficients.blue_scale,
            "White balance updated"
        );
        Ok(())
    }
}
