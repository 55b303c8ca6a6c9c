use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::detector::{DetectionConfig, FallDetector, SampleOutcome, TimerOutcome};
use crate::engine::{FallDetectionEngine, FallEventCallback};
use crate::haptics::{HapticKind, HapticsSink};
use crate::model::{AccelerationSample, FallConfidence, FallEvent, FallEventKind, Severity};
use crate::notify::{Alert, NotificationSink, NotifyError};
use crate::sensor::{MotionSensorSource, SensorError, StreamSensorSource};
use crate::settings::{SettingsProvider, UserSettings};
use crate::store::{EventStore, StoreError};

fn sample(x: f64, y: f64, z: f64) -> AccelerationSample {
    AccelerationSample { x, y, z, t: 0.0 }
}

fn stamped(t: f64) -> AccelerationSample {
    AccelerationSample {
        x: 0.0,
        y: 0.0,
        z: 0.1,
        t,
    }
}

mod detector_tests {
    use super::*;

    fn detector() -> FallDetector {
        FallDetector::new(DetectionConfig::default(), Instant::now())
    }

    #[test]
    fn rolling_window_is_bounded_and_fifo() {
        let mut d = detector();
        let now = Instant::now();
        for i in 0..50 {
            d.observe(stamped(i as f64), now);
            assert!(d.window().len() <= 20);
        }
        assert_eq!(d.window().len(), 20);
        // samples 30..=49 remain; the oldest went first
        assert_eq!(d.window().front().unwrap().t, 30.0);
        assert_eq!(d.window().back().unwrap().t, 49.0);
    }

    #[test]
    fn no_candidate_at_or_below_threshold() {
        let mut d = detector();
        let now = Instant::now();
        // exactly 2.5g is not beyond the threshold
        let outcome = d.observe(sample(0.0, 0.0, 2.5), now);
        assert!(matches!(outcome, SampleOutcome::Activity { dismissed: false }));
        assert!(!d.candidate_open());
    }

    #[test]
    fn smooth_ramp_never_detects() {
        let mut d = detector();
        let now = Instant::now();
        for i in 1..=10 {
            let outcome = d.observe(sample(0.0, 0.0, 0.1 * i as f64), now);
            assert!(!matches!(outcome, SampleOutcome::Candidate(_)));
        }
        assert!(!d.candidate_open());
    }

    #[test]
    fn single_impact_without_history_scores_moderate() {
        let mut d = detector();
        // magnitude 4.0 with z = 3.0: 3 (magnitude) + 0 (no history) + 1
        // (vertical) = 4 points, which is moderate, not high
        let x = (16.0f64 - 9.0).sqrt();
        match d.observe(sample(x, 0.0, 3.0), Instant::now()) {
            SampleOutcome::Candidate(c) => {
                assert!((c.magnitude - 4.0).abs() < 1e-9);
                assert_eq!(c.confidence, FallConfidence::Moderate);
                assert_eq!(c.timeout, Duration::from_secs(60));
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn impact_after_steady_history_scores_high() {
        let mut d = detector();
        let now = Instant::now();
        for _ in 0..5 {
            d.observe(sample(0.0, 0.0, 1.0), now);
        }
        // magnitude > 3.5 scores 3, axis deltas 0.5 + 0.3 + 3.0 > 3.0 add 2,
        // |z| > 2 adds 1: six points, high tier, halved timeout
        match d.observe(sample(0.5, 0.3, 4.0), now) {
            SampleOutcome::Candidate(c) => {
                assert_eq!(c.confidence, FallConfidence::High);
                assert_eq!(c.timeout, Duration::from_secs(30));
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn confidence_never_decreases_with_magnitude() {
        let mut tiers = Vec::new();
        for magnitude in [2.6, 3.1, 3.6, 4.5] {
            let mut d = detector();
            match d.observe(sample(0.0, 0.0, magnitude), Instant::now()) {
                SampleOutcome::Candidate(c) => tiers.push(c.confidence),
                other => panic!("expected candidate at {magnitude}g, got {other:?}"),
            }
        }
        for pair in tiers.windows(2) {
            assert!(pair[0] <= pair[1], "confidence regressed: {tiers:?}");
        }
    }

    #[test]
    fn velocity_change_sums_recent_deltas() {
        let mut d = detector();
        let now = Instant::now();
        d.observe(sample(0.0, 0.0, 1.0), now);
        d.observe(sample(0.0, 0.0, 2.0), now);
        match d.observe(sample(0.0, 0.0, 5.0), now) {
            SampleOutcome::Candidate(c) => {
                // |2 - 1| + |5 - 2| over the three samples in the window
                assert!((c.velocity_change - 4.0).abs() < 1e-9);
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn velocity_change_is_zero_without_history() {
        let mut d = detector();
        match d.observe(sample(0.0, 0.0, 3.0), Instant::now()) {
            SampleOutcome::Candidate(c) => assert_eq!(c.velocity_change, 0.0),
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn renewed_movement_dismisses_candidate() {
        let mut d = detector();
        let now = Instant::now();
        assert!(matches!(
            d.observe(sample(0.0, 0.0, 3.0), now),
            SampleOutcome::Candidate(_)
        ));
        assert!(d.candidate_open());

        let outcome = d.observe(sample(0.0, 0.0, 0.8), now + Duration::from_secs(5));
        assert!(matches!(outcome, SampleOutcome::Activity { dismissed: true }));
        assert!(!d.candidate_open());

        // the timer evaluating later finds nothing to confirm
        assert!(matches!(
            d.check_inactivity(now + Duration::from_secs(120)),
            TimerOutcome::Idle
        ));
    }

    #[test]
    fn second_impact_reopens_with_fresh_score() {
        let mut d = detector();
        let now = Instant::now();
        d.observe(sample(0.0, 0.0, 2.6), now);
        assert!(d.candidate_open());

        match d.observe(sample(0.5, 0.3, 4.0), now + Duration::from_secs(1)) {
            SampleOutcome::Candidate(c) => {
                assert!(c.dismissed_previous);
                assert_eq!(c.confidence, FallConfidence::Moderate);
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn timer_confirms_only_after_stillness() {
        let mut d = detector();
        let start = Instant::now();
        d.observe(sample(0.0, 0.0, 3.0), start);
        // sub-threshold samples do not count as activity
        d.observe(stamped(1.0), start + Duration::from_secs(10));

        match d.check_inactivity(start + Duration::from_secs(60)) {
            TimerOutcome::Confirmed { inactive } => {
                assert!(inactive >= Duration::from_secs(30));
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert!(!d.candidate_open());
    }

    #[test]
    fn timer_lapses_without_enough_stillness() {
        let mut d = detector();
        let start = Instant::now();
        d.observe(sample(0.0, 0.0, 3.0), start);

        assert!(matches!(
            d.check_inactivity(start + Duration::from_secs(10)),
            TimerOutcome::Lapsed
        ));
        // the lapse dismisses the candidate instead of leaving it wedged open
        assert!(!d.candidate_open());
    }

    #[test]
    fn user_ok_closes_candidate() {
        let mut d = detector();
        d.observe(sample(0.0, 0.0, 3.0), Instant::now());
        assert!(d.confirm_user_ok());
        assert!(!d.candidate_open());
        // nothing left to close the second time
        assert!(!d.confirm_user_ok());
    }
}

mod model_tests {
    use super::*;

    #[test]
    fn fall_event_wire_shape() {
        let event = FallEvent::detected(3.2, FallConfidence::Moderate, 1.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "fall_detected");
        assert_eq!(json["confidence"], "moderate");
        assert!(json.get("inactive_duration_ms").is_none());
    }

    #[test]
    fn confirmed_event_is_pinned_high() {
        let event = FallEvent::confirmed(31_000);
        assert_eq!(event.confidence, Some(FallConfidence::High));
        assert_eq!(event.inactive_duration_ms, Some(31_000));
    }

    #[test]
    fn sample_accepts_both_timestamp_keys() {
        let a: AccelerationSample =
            serde_json::from_str(r#"{"x":0.1,"y":0.2,"z":0.3,"t":17.0}"#).unwrap();
        let b: AccelerationSample =
            serde_json::from_str(r#"{"x":0.1,"y":0.2,"z":0.3,"timestamp":17.0}"#).unwrap();
        assert_eq!(a.t, b.t);
    }
}

mod engine_tests {
    use super::*;

    struct UnavailableSensor;

    impl MotionSensorSource for UnavailableSensor {
        fn is_available(&self) -> bool {
            false
        }

        fn subscribe(
            &self,
            _interval: Duration,
        ) -> Result<mpsc::Receiver<AccelerationSample>, SensorError> {
            Err(SensorError::Unavailable)
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        events: Mutex<Vec<FallEvent>>,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn kinds(&self) -> Vec<FallEventKind> {
            self.events.lock().unwrap().iter().map(|e| e.kind).collect()
        }
    }

    impl EventStore for RecordingStore {
        fn append(
            &self,
            _user_id: &str,
            event: &FallEvent,
        ) -> BoxFuture<'static, Result<(), StoreError>> {
            if self.fail {
                return Box::pin(async { Err(StoreError::Database(sqlx::Error::PoolClosed)) });
            }
            self.events.lock().unwrap().push(event.clone());
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        locals: Mutex<Vec<Alert>>,
        family: Mutex<Vec<(String, bool)>>,
    }

    impl NotificationSink for RecordingNotifier {
        fn show_local(&self, alert: Alert) -> BoxFuture<'static, Result<(), NotifyError>> {
            self.locals.lock().unwrap().push(alert);
            Box::pin(async { Ok(()) })
        }

        fn send_to_family(
            &self,
            message: String,
            urgent: bool,
        ) -> BoxFuture<'static, Result<(), NotifyError>> {
            self.family.lock().unwrap().push((message, urgent));
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct RecordingHaptics {
        kinds: Mutex<Vec<HapticKind>>,
    }

    impl HapticsSink for RecordingHaptics {
        fn notify(&self, kind: HapticKind) {
            self.kinds.lock().unwrap().push(kind);
        }
    }

    struct FixedSettings(UserSettings);

    impl SettingsProvider for FixedSettings {
        fn get(&self) -> BoxFuture<'static, UserSettings> {
            let settings = self.0.clone();
            Box::pin(async move { settings })
        }
    }

    struct Harness {
        engine: FallDetectionEngine,
        sensor: Arc<StreamSensorSource>,
        store: Arc<RecordingStore>,
        notifier: Arc<RecordingNotifier>,
        haptics: Arc<RecordingHaptics>,
        observed: Arc<Mutex<Vec<FallEvent>>>,
    }

    impl Harness {
        fn with_store(store: RecordingStore) -> Self {
            let sensor = Arc::new(StreamSensorSource::new());
            let store = Arc::new(store);
            let notifier = Arc::new(RecordingNotifier::default());
            let haptics = Arc::new(RecordingHaptics::default());
            let engine = FallDetectionEngine::new(
                sensor.clone(),
                store.clone(),
                notifier.clone(),
                haptics.clone(),
                Arc::new(FixedSettings(UserSettings::default())),
                "senior-test",
                DetectionConfig::default(),
            );
            Self {
                engine,
                sensor,
                store,
                notifier,
                haptics,
                observed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn new() -> Self {
            Self::with_store(RecordingStore::default())
        }

        async fn start(&self) -> bool {
            let observed = self.observed.clone();
            let callback: FallEventCallback =
                Box::new(move |event| observed.lock().unwrap().push(event.clone()));
            self.engine.start(Some(callback)).await
        }

        fn observed_kinds(&self) -> Vec<FallEventKind> {
            self.observed.lock().unwrap().iter().map(|e| e.kind).collect()
        }

        fn family_alerts(&self) -> Vec<(String, bool)> {
            self.notifier.family.lock().unwrap().clone()
        }

        fn haptic_kinds(&self) -> Vec<HapticKind> {
            self.haptics.kinds.lock().unwrap().clone()
        }
    }

    /// Let the engine task drain its channels and spawned work finish. The
    /// paused clock only advances by these 20ms, far short of any deadline.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_without_sensor() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = FallDetectionEngine::new(
            Arc::new(UnavailableSensor),
            Arc::new(RecordingStore::default()),
            notifier.clone(),
            Arc::new(RecordingHaptics::default()),
            Arc::new(FixedSettings(UserSettings::default())),
            "senior-test",
            DetectionConfig::default(),
        );

        assert!(!engine.start(None).await);
        assert!(!engine.is_active());
        assert!(notifier.locals.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let h = Harness::new();
        assert!(h.start().await);
        assert!(h.engine.is_active());

        h.engine.stop().await;
        assert!(!h.engine.is_active());

        // stopping again is a no-op, not an error
        h.engine.stop().await;
        assert!(!h.engine.is_active());
        assert!(!h.engine.status().await.is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn high_confidence_fall_escalates_after_stillness() {
        let h = Harness::new();
        assert!(h.start().await);

        // steady movement builds window history
        for _ in 0..5 {
            assert!(h.sensor.ingest(sample(0.0, 0.0, 1.0)));
        }
        // hard impact with a strong vertical component, scoring high
        assert!(h.sensor.ingest(sample(0.5, 0.3, 4.0)));
        settle().await;

        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);
        assert_eq!(h.store.kinds(), vec![FallEventKind::FallDetected]);
        assert_eq!(h.haptic_kinds(), vec![HapticKind::Error]);
        assert_eq!(h.notifier.locals.lock().unwrap().len(), 1);

        let status = h.engine.status().await;
        assert!(status.is_active);
        assert!(status.fall_detected);

        // 29s in: the 30s high-confidence timer has not fired yet
        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);

        // past the deadline: exactly one confirmation, family alerted
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(
            h.observed_kinds(),
            vec![FallEventKind::FallDetected, FallEventKind::FallConfirmed]
        );
        let confirmed = h.observed.lock().unwrap().last().unwrap().clone();
        assert!(confirmed.inactive_duration_ms.unwrap() >= 30_000);
        assert_eq!(confirmed.confidence, Some(FallConfidence::High));
        assert_eq!(h.family_alerts(), vec![(
            "A fall was detected with no response. Check on them immediately!".to_string(),
            true
        )]);
        assert_eq!(h.haptic_kinds(), vec![HapticKind::Error, HapticKind::Error]);

        // the candidate is resolved; the engine keeps monitoring
        let status = h.engine.status().await;
        assert!(status.is_active);
        assert!(!status.fall_detected);
    }

    #[tokio::test(start_paused = true)]
    async fn moderate_confidence_uses_full_timeout() {
        let h = Harness::new();
        assert!(h.start().await);

        // no history, z = 3.2: 2 (magnitude) + 1 (vertical) = moderate
        assert!(h.sensor.ingest(sample(0.0, 0.0, 3.2)));
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);
        assert_eq!(h.haptic_kinds(), vec![HapticKind::Warning]);

        // a 30s timer would have fired long before this
        tokio::time::advance(Duration::from_secs(59)).await;
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(
            h.observed_kinds(),
            vec![FallEventKind::FallDetected, FallEventKind::FallConfirmed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn movement_cancels_pending_escalation() {
        let h = Harness::new();
        assert!(h.start().await);

        assert!(h.sensor.ingest(sample(0.0, 0.0, 3.0)));
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);

        // the person gets up within a few seconds
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(h.sensor.ingest(sample(0.0, 0.0, 0.8)));
        settle().await;
        assert!(!h.engine.status().await.fall_detected);

        // well past every deadline: no confirmation, no family alert
        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);
        assert!(h.family_alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_user_ok_cancels_timer_and_records_event() {
        let h = Harness::new();
        assert!(h.start().await);

        assert!(h.sensor.ingest(sample(0.0, 0.0, 3.0)));
        settle().await;

        h.engine.confirm_user_ok().await;
        settle().await;
        assert_eq!(
            h.observed_kinds(),
            vec![FallEventKind::FallDetected, FallEventKind::UserOk]
        );
        assert_eq!(h.store.kinds(), h.observed_kinds());
        assert!(h.haptic_kinds().contains(&HapticKind::Success));

        // the deadline the candidate armed passes without a confirmation
        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(
            h.observed_kinds(),
            vec![FallEventKind::FallDetected, FallEventKind::UserOk]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn user_ok_without_pending_fall_still_records() {
        let h = Harness::new();
        assert!(h.start().await);

        h.engine.confirm_user_ok().await;
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::UserOk]);
        assert_eq!(h.store.kinds(), vec![FallEventKind::UserOk]);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_never_blocks_alerts() {
        let h = Harness::with_store(RecordingStore::failing());
        assert!(h.start().await);

        assert!(h.sensor.ingest(sample(0.5, 0.3, 4.0)));
        settle().await;

        // persistence failed, but the haptic and the notification went out
        assert!(h.store.kinds().is_empty());
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);
        assert_eq!(h.notifier.locals.lock().unwrap().len(), 1);
        assert!(!h.haptic_kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_fall_follows_the_real_path() {
        let h = Harness::new();
        assert!(h.start().await);

        assert!(h.engine.simulate_fall(Severity::High).await);
        settle().await;
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);
        let event = h.observed.lock().unwrap()[0].clone();
        assert!(event.acceleration_g.unwrap() > 3.5);

        // an idle engine has no pipeline to feed
        h.engine.stop().await;
        assert!(!h.engine.simulate_fall(Severity::Low).await);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_subscription() {
        let h = Harness::new();
        assert!(h.start().await);
        assert!(h.start().await);

        assert!(h.sensor.ingest(sample(0.0, 0.0, 3.0)));
        settle().await;
        // one subscription, one event: no duplicate delivery after restart
        assert_eq!(h.observed_kinds(), vec![FallEventKind::FallDetected]);
    }

    #[tokio::test(start_paused = true)]
    async fn haptics_preference_is_respected() {
        let sensor = Arc::new(StreamSensorSource::new());
        let haptics = Arc::new(RecordingHaptics::default());
        let engine = FallDetectionEngine::new(
            sensor.clone(),
            Arc::new(RecordingStore::default()),
            Arc::new(RecordingNotifier::default()),
            haptics.clone(),
            Arc::new(FixedSettings(UserSettings {
                haptic_feedback_enabled: false,
                ..UserSettings::default()
            })),
            "senior-test",
            DetectionConfig::default(),
        );

        assert!(engine.start(None).await);
        assert!(sensor.ingest(sample(0.0, 0.0, 3.0)));
        settle().await;
        assert!(haptics.kinds.lock().unwrap().is_empty());
    }
}
