#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::acquisition::config::{CameraConfig, MAX_EXPOSURE_MS, MAX_SNAP_SLACK_MS, Roi};
    use crate::acquisition::consumer::FrameConsumer;
    use crate::acquisition::controller::{AcquisitionController, ControllerState, DeliveryOutcome, FrameDelivery};
    use crate::acquisition::producer::{ArmRequest, FrameProducer};
    use crate::acquisition::sequencer::{SequenceLength, Sequencer};
    use crate::acquisition::session::{AcquisitionSession, SessionOutcome};
    use crate::acquisition::sink::{FrameSink, InsertOutcome, OverflowPolicy};
    use crate::acquisition::synthetic::SyntheticProducer;
    use crate::image_pipeline::{
        AcquisitionError, BayerPhase, Channel, DebayerAlgorithm, PipelineConfig, PixelFormat, ProcessedFrame, RawFrame,
        RawSamples, Result, SensorType, WhiteBalanceCoefficients,
    };

    #[derive(Default)]
    struct MockProducer {
        request: Mutex<Option<ArmRequest>>,
        fail_arm: AtomicBool,
        triggers: AtomicUsize,
        disarms: AtomicUsize,
    }

    impl MockProducer {
        fn delivery(&self) -> FrameDelivery {
            self.request.lock().unwrap().as_ref().unwrap().delivery.clone()
        }

        fn last_request(&self) -> ArmRequest {
            self.request.lock().unwrap().clone().unwrap()
        }
    }

    impl FrameProducer for MockProducer {
        fn arm(&self, request: ArmRequest) -> Result<()> {
            if self.fail_arm.load(Ordering::SeqCst) {
                return Err(AcquisitionError::ArmFailed("Mock resource busy".to_string()));
            }
            *self.request.lock().unwrap() = Some(request);
            Ok(())
        }

        fn trigger(&self) -> Result<()> {
            self.triggers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disarm(&self) {
            self.disarms.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingConsumer {
        frames: Mutex<Vec<u64>>,
        overflows: AtomicUsize,
        outcomes: Mutex<Vec<SessionOutcome>>,
    }

    impl FrameConsumer for RecordingConsumer {
        fn on_frame_ready(&self, frame: &Arc<ProcessedFrame>) {
            self.frames.lock().unwrap().push(frame.frame_number);
        }

        fn on_overflow(&self) {
            self.overflows.fetch_add(1, Ordering::SeqCst);
        }

        fn on_acquisition_finished(&self, outcome: &SessionOutcome) {
            self.outcomes.lock().unwrap().push(outcome.clone());
        }
    }

    fn mono_config() -> CameraConfig {
        CameraConfig::builder()
            .sensor_size(4, 4)
            .bits_per_sample(12)
            .exposure_ms(1.0)
            .snap_slack_ms(2000)
            .sink_capacity(8)
            .build()
    }

    fn setup(config: CameraConfig) -> (AcquisitionController, Arc<MockProducer>, Arc<RecordingConsumer>) {
        let producer = Arc::new(MockProducer::default());
        let consumer = Arc::new(RecordingConsumer::default());
        let controller = AcquisitionController::new(config, producer.clone(), consumer.clone()).unwrap();
        (controller, producer, consumer)
    }

    fn mono_samples() -> Vec<u16> {
        (0..16).map(|v| v * 100).collect()
    }

    fn processed(frame_number: u64) -> ProcessedFrame {
        ProcessedFrame::new(2, 2, 8, PixelFormat::Gray8, vec![0; 4]).with_frame_number(frame_number)
    }

    #[test]
    fn test_sink_halt_on_overflow() {
        let sink = FrameSink::new(2, OverflowPolicy::HaltOnOverflow).unwrap();

        assert_eq!(sink.insert(processed(0)).unwrap(), InsertOutcome::Queued);
        assert_eq!(sink.insert(processed(1)).unwrap(), InsertOutcome::Queued);
        assert_eq!(sink.insert(processed(2)), Err(AcquisitionError::BufferOverflow(2)));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.overflow_count(), 1);
    }

    #[test]
    fn test_sink_drop_and_continue_keeps_newest() {
        let sink = FrameSink::new(2, OverflowPolicy::DropAndContinue).unwrap();

        assert!(sink.insert(processed(0)).is_ok());
        assert!(sink.insert(processed(1)).is_ok());
        assert_eq!(sink.insert(processed(2)).unwrap(), InsertOutcome::DroppedBacklog(2));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.pop().unwrap().frame_number, 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_sink_rejects_zero_capacity() {
        assert!(matches!(
            FrameSink::new(0, OverflowPolicy::HaltOnOverflow),
            Err(AcquisitionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sink_pop_timeout() {
        let sink = Arc::new(FrameSink::new(4, OverflowPolicy::HaltOnOverflow).unwrap());
        let start = Instant::now();
        assert!(sink.pop_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));

        let writer = Arc::clone(&sink);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.insert(processed(7)).unwrap();
        });
        let frame = sink.pop_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(frame.frame_number, 7);
        handle.join().unwrap();

        sink.insert(processed(8)).unwrap();
        sink.insert(processed(9)).unwrap();
        let drained: Vec<u64> = sink.drain().iter().map(|f| f.frame_number).collect();
        assert_eq!(drained, [8, 9]);
    }

    #[test]
    fn test_snap_timeout_returns_to_idle() {
        let config = CameraConfig::builder()
            .sensor_size(4, 4)
            .exposure_ms(100.0)
            .snap_slack_ms(150)
            .build();
        let (controller, producer, consumer) = setup(config);

        let start = Instant::now();
        let result = controller.snap();
        let elapsed = start.elapsed();

        assert_eq!(result, Err(AcquisitionError::Timeout(250)));
        assert!(elapsed >= Duration::from_millis(100), "returned after {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(250 + 500), "returned after {:?}", elapsed);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(producer.disarms.load(Ordering::SeqCst) >= 1);
        assert_eq!(*consumer.outcomes.lock().unwrap(), [SessionOutcome::TimedOut]);
    }

    #[test]
    fn test_snap_with_delivery() {
        let (controller, producer, consumer) = setup(mono_config());

        controller.arm(AcquisitionSession::snap()).unwrap();
        assert_eq!(controller.state(), ControllerState::Armed);

        let delivery = producer.delivery();
        let handle = thread::spawn(move || {
            while !delivery.is_active() {
                thread::sleep(Duration::from_millis(1));
            }
            let data = mono_samples();
            delivery.deliver(&RawFrame::monochrome(4, 4, 12, RawSamples::U16(&data)))
        });

        controller.trigger().unwrap();
        assert_eq!(handle.join().unwrap(), DeliveryOutcome::Completed);
        assert_eq!(controller.state(), ControllerState::Idle);

        let frame = controller.sink().pop().unwrap();
        assert_eq!(frame.pixel_format, PixelFormat::Gray16);
        assert_eq!(frame.gray16_at(3, 3), Some(1500));
        assert_eq!(*consumer.frames.lock().unwrap(), [0]);
        assert_eq!(*consumer.outcomes.lock().unwrap(), [SessionOutcome::Completed]);
    }

    #[test]
    fn test_snap_cancelled_by_disarm() {
        let (controller, _producer, consumer) = setup(mono_config());
        let canceller = controller.clone();
        let handle = thread::spawn(move || {
            while canceller.state() != ControllerState::Capturing {
                thread::sleep(Duration::from_millis(1));
            }
            canceller.disarm();
        });

        assert_eq!(controller.snap(), Err(AcquisitionError::Cancelled));
        handle.join().unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(*consumer.outcomes.lock().unwrap(), [SessionOutcome::Cancelled]);
    }

    #[test]
    fn test_finite_sequence_of_three() {
        let (controller, producer, consumer) = setup(mono_config());
        let sequencer = Sequencer::new(controller.clone());

        sequencer.start_sequence(SequenceLength::Count(3)).unwrap();
        assert!(sequencer.is_sequencing());
        assert_eq!(producer.triggers.load(Ordering::SeqCst), 1);

        let delivery = producer.delivery();
        let data = mono_samples();
        let frame = RawFrame::monochrome(4, 4, 12, RawSamples::U16(&data));
        let outcomes: Vec<_> = (0..3).map(|_| delivery.deliver(&frame)).collect();

        assert_eq!(
            outcomes,
            [DeliveryOutcome::Accepted, DeliveryOutcome::Accepted, DeliveryOutcome::Completed]
        );
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(!sequencer.is_sequencing());
        assert_eq!(sequencer.frames_acquired(), 3);
        assert_eq!(*consumer.frames.lock().unwrap(), [0, 1, 2]);
        assert_eq!(*consumer.outcomes.lock().unwrap(), [SessionOutcome::Completed]);

        let queued: Vec<u64> = controller.sink().drain().iter().map(|f| f.frame_number).collect();
        assert_eq!(queued, [0, 1, 2]);
    }

    #[test]
    fn test_continuous_sequence_until_stopped() {
        let (controller, producer, consumer) = setup(mono_config());
        let sequencer = Sequencer::new(controller.clone());
        sequencer.start_sequence(SequenceLength::Unbounded).unwrap();

        let delivery = producer.delivery();
        let data = mono_samples();
        let frame = RawFrame::monochrome(4, 4, 12, RawSamples::U16(&data));
        for _ in 0..5 {
            assert_eq!(delivery.deliver(&frame), DeliveryOutcome::Accepted);
            controller.sink().pop();
        }
        assert!(sequencer.is_sequencing());

        sequencer.stop_sequence();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(delivery.deliver(&frame), DeliveryOutcome::Discarded);

        let stats = controller.stats();
        assert_eq!(stats.frames_delivered, 5);
        assert_eq!(stats.frames_discarded, 1);
        assert_eq!(stats.last_outcome, Some(SessionOutcome::Cancelled));
        assert_eq!(consumer.frames.lock().unwrap().len(), 5);

        // stopping again is a no-op
        sequencer.stop_sequence();
        assert_eq!(controller.stats().terminal_transitions, 1);
    }

    #[test]
    fn test_sequence_halts_on_overflow() {
        let config = CameraConfig::builder().sensor_size(4, 4).sink_capacity(2).build();
        let (controller, producer, consumer) = setup(config);
        let sequencer = Sequencer::new(controller.clone());
        sequencer
            .start_sequence_with(SequenceLength::Unbounded, true)
            .unwrap();

        let delivery = producer.delivery();
        let data = mono_samples();
        let frame = RawFrame::monochrome(4, 4, 12, RawSamples::U16(&data));
        assert_eq!(delivery.deliver(&frame), DeliveryOutcome::Accepted);
        assert_eq!(delivery.deliver(&frame), DeliveryOutcome::Accepted);
        assert_eq!(delivery.deliver(&frame), DeliveryOutcome::Rejected);

        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.sink().len(), 2);
        assert_eq!(consumer.overflows.load(Ordering::SeqCst), 1);
        assert_eq!(*consumer.outcomes.lock().unwrap(), [SessionOutcome::Overflowed]);
    }

    #[test]
    fn test_sequence_drops_backlog_and_continues() {
        let config = CameraConfig::builder().sensor_size(4, 4).sink_capacity(2).build();
        let (controller, producer, consumer) = setup(config);
        let sequencer = Sequencer::new(controller.clone());
        sequencer
            .start_sequence_with(SequenceLength::Unbounded, false)
            .unwrap();

        let delivery = producer.delivery();
        let data = mono_samples();
        let frame = RawFrame::monochrome(4, 4, 12, RawSamples::U16(&data));
        for _ in 0..3 {
            assert_eq!(delivery.deliver(&frame), DeliveryOutcome::Accepted);
        }

        assert!(sequencer.is_sequencing());
        let sink = controller.sink();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.pop().unwrap().frame_number, 2);
        assert_eq!(consumer.overflows.load(Ordering::SeqCst), 1);
        assert_eq!(controller.stats().backlog_frames_dropped, 2);
        sequencer.stop_sequence();
    }

    #[test]
    fn test_cancellation_race_has_single_outcome() {
        let (controller, producer, consumer) = setup(mono_config());

        for i in 0..200 {
            let before = controller.stats().terminal_transitions;
            controller.arm(AcquisitionSession::finite(1)).unwrap();
            controller.trigger().unwrap();

            let delivery = producer.delivery();
            let handle = thread::spawn(move || {
                let data = mono_samples();
                delivery.deliver(&RawFrame::monochrome(4, 4, 12, RawSamples::U16(&data)))
            });
            if i % 2 == 0 {
                thread::yield_now();
            }
            controller.disarm();
            let delivered = handle.join().unwrap();
            assert!(controller.wait_idle(Duration::from_secs(5)));

            let stats = controller.stats();
            assert_eq!(stats.terminal_transitions, before + 1, "iteration {}", i);
            let queued = controller.sink().drain().len();
            match stats.last_outcome {
                Some(SessionOutcome::Completed) => {
                    assert_eq!(queued, 1);
                    assert_eq!(delivered, DeliveryOutcome::Completed);
                }
                Some(SessionOutcome::Cancelled) => {
                    assert_eq!(queued, 0);
                    assert_eq!(delivered, DeliveryOutcome::Discarded);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(consumer.outcomes.lock().unwrap().len(), 200);
    }

    #[test]
    fn test_busy_controller_rejects_arm_and_sequence() {
        let (controller, _producer, _consumer) = setup(mono_config());
        let sequencer = Sequencer::new(controller.clone());

        controller.arm(AcquisitionSession::continuous()).unwrap();
        assert!(controller.is_busy());
        assert_eq!(controller.arm(AcquisitionSession::snap()), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(
            sequencer.start_sequence(SequenceLength::Count(2)),
            Err(AcquisitionError::AlreadyBusy)
        );

        controller.disarm();
        controller.disarm();
        assert!(!controller.is_busy());
        assert_eq!(controller.stats().terminal_transitions, 1);
    }

    #[test]
    fn test_trigger_requires_armed() {
        let (controller, _producer, _consumer) = setup(mono_config());
        assert!(matches!(controller.trigger(), Err(AcquisitionError::InvalidState(_))));
    }

    #[test]
    fn test_arm_failure_leaves_idle() {
        let (controller, producer, consumer) = setup(mono_config());
        producer.fail_arm.store(true, Ordering::SeqCst);

        assert!(matches!(
            controller.arm(AcquisitionSession::snap()),
            Err(AcquisitionError::ArmFailed(_))
        ));
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(consumer.outcomes.lock().unwrap().is_empty());

        producer.fail_arm.store(false, Ordering::SeqCst);
        assert!(controller.arm(AcquisitionSession::snap()).is_ok());
    }

    #[test]
    fn test_configuration_rejected_while_busy() {
        let config = CameraConfig::builder().sensor_size(16, 16).build();
        let (controller, _producer, _consumer) = setup(config);

        controller.arm(AcquisitionSession::continuous()).unwrap();
        assert_eq!(controller.set_roi(0, 0, 8, 8), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(controller.set_binning(2), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(controller.set_exposure(5.0), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(controller.set_sink_capacity(4), Err(AcquisitionError::AlreadyBusy));

        controller.disarm();
        controller.set_roi(2, 2, 8, 8).unwrap();
        controller.set_binning(2).unwrap();
        assert_eq!(controller.config().roi, Some(Roi::new(2, 2, 8, 8)));
        assert_eq!(controller.config().frame_size(), (4, 4));

        controller.clear_roi().unwrap();
        assert_eq!(controller.config().frame_size(), (8, 8));
    }

    #[test]
    fn test_invalid_geometry_rejected_at_configuration() {
        let config = CameraConfig::builder()
            .sensor_size(16, 16)
            .sensor_type(SensorType::BayerColor)
            .build();
        let (controller, _producer, _consumer) = setup(config);

        assert!(matches!(controller.set_roi(8, 8, 16, 16), Err(AcquisitionError::InvalidGeometry(_))));
        assert!(matches!(controller.set_roi(1, 0, 8, 8), Err(AcquisitionError::InvalidGeometry(_))));
        assert!(matches!(controller.set_binning(2), Err(AcquisitionError::InvalidGeometry(_))));
        assert!(matches!(controller.set_binning(0), Err(AcquisitionError::InvalidGeometry(_))));
        assert!(matches!(
            controller.set_sensor_type(SensorType::BayerColor, 6),
            Err(AcquisitionError::UnsupportedPixelFormat(_))
        ));
        assert!(matches!(controller.set_sink_capacity(0), Err(AcquisitionError::InvalidConfig(_))));

        // rejected changes leave the configuration untouched
        assert_eq!(controller.config().roi, None);
        assert_eq!(controller.config().binning, 1);
    }

    #[test]
    fn test_frame_size_mismatch_stops_acquisition() {
        let (controller, producer, consumer) = setup(mono_config());
        controller.arm(AcquisitionSession::finite(2)).unwrap();
        controller.trigger().unwrap();

        let data = [0u16; 4];
        let outcome = producer
            .delivery()
            .deliver(&RawFrame::monochrome(2, 2, 12, RawSamples::U16(&data)));

        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(matches!(
            consumer.outcomes.lock().unwrap().as_slice(),
            [SessionOutcome::Failed(AcquisitionError::InvalidGeometry(_))]
        ));
    }

    #[test]
    fn test_arm_request_interval_and_geometry() {
        let config = CameraConfig::builder().sensor_size(16, 8).exposure_ms(20.0).build();
        let (controller, producer, _consumer) = setup(config);

        controller
            .arm(AcquisitionSession::finite(4).with_interval(Duration::from_millis(5)))
            .unwrap();
        let request = producer.last_request();
        assert_eq!(request.interval, Duration::from_millis(20));
        assert_eq!(request.frame_limit, Some(4));
        assert_eq!((request.geometry.width, request.geometry.height), (16, 8));
        controller.disarm();

        controller
            .arm(AcquisitionSession::continuous().with_interval(Duration::from_millis(50)))
            .unwrap();
        assert_eq!(producer.last_request().interval, Duration::from_millis(50));
        assert_eq!(producer.last_request().frame_limit, None);
        controller.disarm();
    }

    fn red_cast_mosaic() -> Vec<u16> {
        (0..16)
            .map(|i| match BayerPhase::Rggb.channel_at(i % 4, i / 4) {
                Channel::Red => 2000,
                _ => 1000,
            })
            .collect()
    }

    fn bayer_config() -> CameraConfig {
        CameraConfig::builder()
            .sensor_size(4, 4)
            .sensor_type(SensorType::BayerColor)
            .bits_per_sample(12)
            .bayer_phase(BayerPhase::Rggb)
            .build()
    }

    #[test]
    fn test_white_balance_recalibrates_on_first_frame() {
        let (controller, producer, _consumer) = setup(bayer_config());
        controller.request_white_balance_recalibration().unwrap();
        assert!(controller.white_balance_recalibration_pending());

        controller.arm(AcquisitionSession::finite(1)).unwrap();
        controller.trigger().unwrap();
        let data = red_cast_mosaic();
        let outcome = producer
            .delivery()
            .deliver(&RawFrame::bayer(4, 4, 12, BayerPhase::Rggb, &data));
        assert_eq!(outcome, DeliveryOutcome::Completed);

        let coefficients = controller.white_balance();
        assert!((coefficients.red_scale - 0.6063).abs() < 1e-9);
        assert!((coefficients.green_scale - 1.2126).abs() < 1e-9);
        assert!(!controller.white_balance_recalibration_pending());

        // the calibration frame itself is already balanced
        let frame = controller.sink().pop().unwrap();
        let [b, g, r, _] = frame.bgra_at(0, 0).unwrap();
        assert_eq!((r, g, b), (75, 75, 75));
    }

    #[test]
    fn test_white_balance_management_requires_idle() {
        let (controller, _producer, _consumer) = setup(bayer_config());
        let data = red_cast_mosaic();
        let frame = RawFrame::bayer(4, 4, 12, BayerPhase::Rggb, &data);

        controller.arm(AcquisitionSession::continuous()).unwrap();
        assert_eq!(controller.calibrate_white_balance(&frame), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(
            controller.set_white_balance(WhiteBalanceCoefficients::new(1.0, 1.0, 2.0).unwrap()),
            Err(AcquisitionError::AlreadyBusy)
        );
        controller.disarm();

        let coefficients = controller.calibrate_white_balance(&frame).unwrap();
        assert_eq!(controller.white_balance(), coefficients);
        assert_eq!(controller.config().white_balance, coefficients);

        let invalid = WhiteBalanceCoefficients {
            red_scale: -1.0,
            green_scale: 1.0,
            blue_scale: 1.0,
        };
        assert!(matches!(controller.set_white_balance(invalid), Err(AcquisitionError::InvalidConfig(_))));

        controller.reset_white_balance().unwrap();
        assert!(controller.white_balance().is_neutral());
    }

    #[test]
    fn test_recalibration_needs_bayer_sensor() {
        let (controller, _producer, _consumer) = setup(mono_config());
        assert!(matches!(
            controller.request_white_balance_recalibration(),
            Err(AcquisitionError::UnsupportedPixelFormat(_))
        ));
    }

    /// Holds each delivery inside `on_frame_ready` until released.
    struct GatedConsumer {
        entered: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl FrameConsumer for GatedConsumer {
        fn on_frame_ready(&self, _frame: &Arc<ProcessedFrame>) {
            self.entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
    }

    #[test]
    fn test_configuration_rejected_while_delivery_in_flight() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let producer = Arc::new(MockProducer::default());
        let consumer = Arc::new(GatedConsumer {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        });
        let controller = AcquisitionController::new(bayer_config(), producer.clone(), consumer).unwrap();

        controller.arm(AcquisitionSession::finite(1)).unwrap();
        controller.trigger().unwrap();
        let delivery = producer.delivery();
        let handle = thread::spawn(move || {
            let data = red_cast_mosaic();
            delivery.deliver(&RawFrame::bayer(4, 4, 12, BayerPhase::Rggb, &data))
        });
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // the session has ended but its last frame is still being handed out
        assert_eq!(controller.state(), ControllerState::Idle);
        let doubled = WhiteBalanceCoefficients::new(2.0, 2.0, 2.0).unwrap();
        assert_eq!(controller.set_white_balance(doubled), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(controller.reset_white_balance(), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(
            controller.set_debayer_algorithm(DebayerAlgorithm::SmoothHue),
            Err(AcquisitionError::AlreadyBusy)
        );
        assert_eq!(controller.set_exposure(5.0), Err(AcquisitionError::AlreadyBusy));
        let data = red_cast_mosaic();
        let reference = RawFrame::bayer(4, 4, 12, BayerPhase::Rggb, &data);
        assert_eq!(controller.calibrate_white_balance(&reference), Err(AcquisitionError::AlreadyBusy));
        assert_eq!(controller.arm(AcquisitionSession::snap()), Err(AcquisitionError::AlreadyBusy));

        release_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), DeliveryOutcome::Completed);
        assert!(controller.wait_idle(Duration::from_secs(5)));

        controller.set_white_balance(doubled).unwrap();
        controller.set_debayer_algorithm(DebayerAlgorithm::SmoothHue).unwrap();
        assert_eq!(controller.white_balance(), doubled);
        assert_eq!(controller.config().pipeline.debayer_algorithm, DebayerAlgorithm::SmoothHue);
    }

    #[test]
    fn test_cancelled_session_never_publishes_white_balance() {
        let config = CameraConfig::builder()
            .sensor_size(512, 512)
            .sensor_type(SensorType::BayerColor)
            .bits_per_sample(12)
            .pipeline(PipelineConfig::builder().debayer_algorithm(DebayerAlgorithm::SmoothHue).build())
            .build();
        let (controller, producer, _consumer) = setup(config);
        let data: Arc<Vec<u16>> = Arc::new(
            (0..512 * 512)
                .map(|i| match BayerPhase::Rggb.channel_at(i % 512, i / 512) {
                    Channel::Red => 2000,
                    _ => 1000,
                })
                .collect(),
        );

        for _ in 0..20 {
            controller.reset_white_balance().unwrap();
            controller.request_white_balance_recalibration().unwrap();
            controller.arm(AcquisitionSession::finite(1)).unwrap();
            controller.trigger().unwrap();

            let delivery = producer.delivery();
            let samples = Arc::clone(&data);
            let handle = thread::spawn(move || delivery.deliver(&RawFrame::bayer(512, 512, 12, BayerPhase::Rggb, &samples)));
            controller.disarm();
            let outcome = handle.join().unwrap();
            assert!(controller.wait_idle(Duration::from_secs(5)));
            controller.sink().clear();

            match outcome {
                DeliveryOutcome::Discarded => {
                    assert!(controller.white_balance().is_neutral());
                    assert!(controller.white_balance_recalibration_pending());
                }
                DeliveryOutcome::Completed => {
                    assert!(!controller.white_balance().is_neutral());
                    assert!(!controller.white_balance_recalibration_pending());
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_exposure_and_slack_are_bounded() {
        let (controller, _producer, _consumer) = setup(mono_config());

        assert!(matches!(controller.set_exposure(1e300), Err(AcquisitionError::InvalidConfig(_))));
        assert!(matches!(controller.set_exposure(f64::NAN), Err(AcquisitionError::InvalidConfig(_))));
        assert!(matches!(controller.set_exposure(-1.0), Err(AcquisitionError::InvalidConfig(_))));
        controller.set_exposure(MAX_EXPOSURE_MS).unwrap();
        assert_eq!(controller.config().exposure(), Duration::from_secs(3600));

        let config = CameraConfig::builder().snap_slack_ms(u64::MAX).build();
        assert!(matches!(config.validate(), Err(AcquisitionError::InvalidConfig(_))));
        assert_eq!(config.snap_deadline(), config.exposure() + Duration::from_millis(MAX_SNAP_SLACK_MS));

        let unchecked = CameraConfig::builder().exposure_ms(1e300).build();
        assert_eq!(unchecked.exposure(), Duration::from_secs(3600));
    }

    #[test]
    fn test_pixel_format_mismatch_stops_acquisition() {
        let (controller, producer, consumer) = setup(mono_config());
        controller.arm(AcquisitionSession::finite(2)).unwrap();
        controller.trigger().unwrap();

        let data = mono_samples();
        let outcome = producer
            .delivery()
            .deliver(&RawFrame::monochrome(4, 4, 16, RawSamples::U16(&data)));
        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert_eq!(controller.state(), ControllerState::Idle);

        controller.arm(AcquisitionSession::finite(2)).unwrap();
        controller.trigger().unwrap();
        let outcome = producer
            .delivery()
            .deliver(&RawFrame::bayer(4, 4, 12, BayerPhase::Rggb, &data));
        assert_eq!(outcome, DeliveryOutcome::Rejected);

        assert!(matches!(
            consumer.outcomes.lock().unwrap().as_slice(),
            [
                SessionOutcome::Failed(AcquisitionError::UnsupportedPixelFormat(_)),
                SessionOutcome::Failed(AcquisitionError::UnsupportedPixelFormat(_))
            ]
        ));
        assert!(controller.sink().is_empty());
    }

    #[test]
    fn test_config_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
sensor_width = 32
sensor_height = 16
sensor_type = "bayer_color"
bits_per_sample = 14
bayer_phase = "grbg"
exposure_ms = 25.0
sink_capacity = 3
overflow_policy = "drop_and_continue"

[roi]
x = 2
y = 2
width = 8
height = 4

[pipeline]
debayer_algorithm = "smooth_hue"
"#
        )
        .unwrap();

        let config = CameraConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sensor_type, SensorType::BayerColor);
        assert_eq!(config.bayer_phase, BayerPhase::Grbg);
        assert_eq!(config.bits_per_sample, 14);
        assert_eq!(config.roi, Some(Roi::new(2, 2, 8, 4)));
        assert_eq!(config.frame_size(), (8, 4));
        assert_eq!(config.overflow_policy, OverflowPolicy::DropAndContinue);
        assert_eq!(config.sink_capacity, 3);
        assert_eq!(config.exposure(), Duration::from_millis(25));
        assert_eq!(config.binning, 1);

        let reparsed = CameraConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_config_load_errors() {
        assert!(matches!(
            CameraConfig::from_file("/nonexistent/camera.toml"),
            Err(AcquisitionError::ConfigLoad(_))
        ));
        assert!(matches!(
            CameraConfig::from_toml_str("sensor_width = \"wide\""),
            Err(AcquisitionError::ConfigLoad(_))
        ));
        assert!(matches!(
            CameraConfig::from_toml_str("sensor_type = \"polarized\"\nbinning = 2"),
            Err(AcquisitionError::InvalidGeometry(_))
        ));
    }

    fn synthetic_controller(config: CameraConfig) -> (AcquisitionController, Arc<RecordingConsumer>) {
        let consumer = Arc::new(RecordingConsumer::default());
        let controller =
            AcquisitionController::new(config, Arc::new(SyntheticProducer::new()), consumer.clone()).unwrap();
        (controller, consumer)
    }

    #[test]
    fn test_synthetic_snap_and_sequence() {
        let config = CameraConfig::builder()
            .sensor_size(16, 8)
            .exposure_ms(2.0)
            .build();
        let (controller, consumer) = synthetic_controller(config);

        controller.snap().unwrap();
        let frame = controller.sink().pop().unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));

        let sequencer = Sequencer::new(controller.clone());
        sequencer.start_sequence(SequenceLength::Count(5)).unwrap();
        assert!(controller.wait_idle(Duration::from_secs(5)));

        assert_eq!(sequencer.frames_acquired(), 5);
        assert_eq!(*consumer.frames.lock().unwrap(), [0, 0, 1, 2, 3, 4]);
        assert_eq!(controller.sink().len(), 5);
    }

    #[test]
    fn test_synthetic_mosaic_sensors() {
        for sensor_type in [SensorType::BayerColor, SensorType::Polarized] {
            let config = CameraConfig::builder()
                .sensor_size(8, 8)
                .sensor_type(sensor_type)
                .exposure_ms(1.0)
                .build();
            let (controller, _consumer) = synthetic_controller(config);

            controller.snap().unwrap();
            let frame = controller.sink().pop().unwrap();
            let expected = if sensor_type == SensorType::BayerColor {
                PixelFormat::Bgra8
            } else {
                PixelFormat::Gray16
            };
            assert_eq!(frame.pixel_format, expected, "{:?}", sensor_type);
        }
    }
}
