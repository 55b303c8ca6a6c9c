use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::detector::{DetectionConfig, FallDetector, SampleOutcome, TimerOutcome};
use crate::haptics::{HapticKind, HapticsSink};
use crate::model::{AccelerationSample, EngineStatus, FallConfidence, FallEvent, Severity};
use crate::notify::{fall_check_alert, fall_confirmed_alert, NotificationSink, FAMILY_ALERT_MESSAGE};
use crate::sensor::MotionSensorSource;
use crate::settings::SettingsProvider;
use crate::store::EventStore;

/// Observer for emitted fall events. At most one is registered at a time;
/// re-registering replaces the previous one.
pub type FallEventCallback = Box<dyn Fn(&FallEvent) + Send + Sync>;

enum Command {
    ConfirmOk,
    Simulate(Severity),
    Status(oneshot::Sender<EngineStatus>),
    Stop,
}

/// Shared fan-out for emitted events: the observer sees the event first,
/// then persistence runs as a spawned task so a slow or failing store never
/// stalls the detection path.
struct EventDispatcher {
    store: Arc<dyn EventStore>,
    haptics: Arc<dyn HapticsSink>,
    user_id: String,
    observer: StdMutex<Option<FallEventCallback>>,
    haptics_enabled: AtomicBool,
}

impl EventDispatcher {
    fn new(store: Arc<dyn EventStore>, haptics: Arc<dyn HapticsSink>, user_id: String) -> Self {
        Self {
            store,
            haptics,
            user_id,
            observer: StdMutex::new(None),
            haptics_enabled: AtomicBool::new(true),
        }
    }

    fn set_observer(&self, observer: FallEventCallback) {
        *self.observer.lock().expect("observer lock poisoned") = Some(observer);
    }

    fn set_haptics_enabled(&self, enabled: bool) {
        self.haptics_enabled.store(enabled, Ordering::Relaxed);
    }

    fn emit(&self, event: FallEvent) {
        if let Some(callback) = self.observer.lock().expect("observer lock poisoned").as_ref() {
            callback(&event);
        }

        let store = Arc::clone(&self.store);
        let user_id = self.user_id.clone();
        tokio::spawn(async move {
            if let Err(err) = store.append(&user_id, &event).await {
                log::warn!("failed to persist {} event: {err}", event.kind.as_str());
            }
        });
    }

    fn haptic(&self, kind: HapticKind) {
        if self.haptics_enabled.load(Ordering::Relaxed) {
            self.haptics.notify(kind);
        }
    }
}

struct RunningEngine {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// The fall detection engine: one owned instance with an explicit
/// start/stop lifecycle, converting the acceleration stream into
/// confidence-scored fall events and escalating the ones nobody answers.
pub struct FallDetectionEngine {
    sensor: Arc<dyn MotionSensorSource>,
    notifier: Arc<dyn NotificationSink>,
    settings: Arc<dyn SettingsProvider>,
    dispatcher: Arc<EventDispatcher>,
    config: DetectionConfig,
    monitoring: AtomicBool,
    runtime: Mutex<Option<RunningEngine>>,
}

impl FallDetectionEngine {
    pub fn new(
        sensor: Arc<dyn MotionSensorSource>,
        store: Arc<dyn EventStore>,
        notifier: Arc<dyn NotificationSink>,
        haptics: Arc<dyn HapticsSink>,
        settings: Arc<dyn SettingsProvider>,
        user_id: impl Into<String>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            sensor,
            notifier,
            settings,
            dispatcher: Arc::new(EventDispatcher::new(store, haptics, user_id.into())),
            config,
            monitoring: AtomicBool::new(false),
            runtime: Mutex::new(None),
        }
    }

    /// Register the event observer. At most one is active; registering
    /// again replaces the previous one.
    pub fn on_fall_event(&self, callback: FallEventCallback) {
        self.dispatcher.set_observer(callback);
    }

    /// Begin monitoring. Returns false, with no side effects, when the
    /// sensor is unavailable or the subscription fails.
    pub async fn start(&self, observer: Option<FallEventCallback>) -> bool {
        if !self.sensor.is_available() {
            log::warn!("accelerometer not available; fall detection stays off");
            return false;
        }

        // A restart replaces the previous subscription outright; two live
        // sample streams would double-count every impact.
        let mut runtime = self.runtime.lock().await;
        if let Some(previous) = runtime.take() {
            Self::shutdown(previous).await;
            self.monitoring.store(false, Ordering::SeqCst);
        }

        let settings = self.settings.get().await;
        self.dispatcher
            .set_haptics_enabled(settings.haptic_feedback_enabled);
        if let Some(observer) = observer {
            self.dispatcher.set_observer(observer);
        }

        let samples = match self.sensor.subscribe(self.config.sampling_interval) {
            Ok(rx) => rx,
            Err(err) => {
                log::error!("sensor subscription failed: {err}");
                return false;
            }
        };

        let (commands, command_rx) = mpsc::channel(16);
        let detector = FallDetector::new(self.config.clone(), Instant::now());
        let task = tokio::spawn(run_engine(
            detector,
            samples,
            command_rx,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.notifier),
        ));

        *runtime = Some(RunningEngine { commands, task });
        self.monitoring.store(true, Ordering::SeqCst);
        log::info!("🟢 fall detection started");
        true
    }

    /// Stop monitoring: cancels the subscription and any pending inactivity
    /// timer. Safe to call when already stopped.
    pub async fn stop(&self) {
        let previous = self.runtime.lock().await.take();
        if let Some(previous) = previous {
            Self::shutdown(previous).await;
            log::info!("🔴 fall detection stopped");
        }
        self.monitoring.store(false, Ordering::SeqCst);
    }

    async fn shutdown(running: RunningEngine) {
        if running.commands.send(Command::Stop).await.is_err() {
            running.task.abort();
        }
        let _ = running.task.await;
    }

    pub fn is_active(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Read-only snapshot for the dashboard.
    pub async fn status(&self) -> EngineStatus {
        let runtime = self.runtime.lock().await;
        if let Some(running) = runtime.as_ref() {
            let (reply, response) = oneshot::channel();
            if running.commands.send(Command::Status(reply)).await.is_ok() {
                if let Ok(status) = response.await {
                    return status;
                }
            }
        }
        EngineStatus::idle()
    }

    /// The user told us they are fine. Always permitted: with no candidate
    /// fall open this is a documented no-op that still records the
    /// reassurance for the family timeline.
    pub async fn confirm_user_ok(&self) {
        {
            let runtime = self.runtime.lock().await;
            if let Some(running) = runtime.as_ref() {
                if running.commands.send(Command::ConfirmOk).await.is_ok() {
                    return;
                }
            }
        }
        self.dispatcher.emit(FallEvent::user_ok());
        self.dispatcher.haptic(HapticKind::Success);
    }

    /// Debug hook: synthesize an impact at the severity's magnitude and
    /// feed it through the regular sample path. Requires an active engine.
    pub async fn simulate_fall(&self, severity: Severity) -> bool {
        let runtime = self.runtime.lock().await;
        match runtime.as_ref() {
            Some(running) => running.commands.send(Command::Simulate(severity)).await.is_ok(),
            None => {
                log::warn!("simulate_fall ignored: engine is not monitoring");
                false
            }
        }
    }
}

/// The processing task. It alone owns the detector, so commands, samples
/// and the inactivity timer can never race on engine state. The deadline is
/// re-read from the open candidate on every turn: intervening motion always
/// lands before the timer can fire.
async fn run_engine(
    mut detector: FallDetector,
    mut samples: mpsc::Receiver<AccelerationSample>,
    mut commands: mpsc::Receiver<Command>,
    dispatcher: Arc<EventDispatcher>,
    notifier: Arc<dyn NotificationSink>,
) {
    let mut samples_open = true;
    loop {
        let deadline = detector.deadline();
        let inactivity_timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::ConfirmOk) => {
                    if detector.confirm_user_ok() {
                        log::info!("user confirmed OK, candidate fall dismissed");
                    }
                    dispatcher.emit(FallEvent::user_ok());
                    dispatcher.haptic(HapticKind::Success);
                }
                Some(Command::Simulate(severity)) => {
                    let sample = AccelerationSample {
                        x: 0.5,
                        y: 0.3,
                        z: severity.magnitude_g(),
                        t: Utc::now().timestamp_millis() as f64,
                    };
                    log::info!("simulating {:?} fall at {:.1}g", severity, sample.magnitude());
                    handle_sample(&mut detector, sample, &dispatcher, &notifier);
                }
                Some(Command::Status(reply)) => {
                    let _ = reply.send(snapshot(&detector));
                }
                Some(Command::Stop) | None => break,
            },

            sample = samples.recv(), if samples_open => match sample {
                Some(sample) => handle_sample(&mut detector, sample, &dispatcher, &notifier),
                None => {
                    // The sensor stream ended underneath us. Keep serving
                    // commands and any armed timer; a candidate that is
                    // already open must still be able to escalate.
                    log::warn!("sensor stream closed while monitoring");
                    samples_open = false;
                }
            },

            _ = inactivity_timer => handle_timer(&mut detector, &dispatcher, &notifier),
        }
    }
}

fn handle_sample(
    detector: &mut FallDetector,
    sample: AccelerationSample,
    dispatcher: &Arc<EventDispatcher>,
    notifier: &Arc<dyn NotificationSink>,
) {
    match detector.observe(sample, Instant::now()) {
        SampleOutcome::Candidate(candidate) => {
            if candidate.dismissed_previous {
                log::debug!("new impact displaced an open candidate fall");
            }
            log::warn!(
                "⚠️ potential fall: {:.2}g ({} confidence), escalation check in {}s",
                candidate.magnitude,
                candidate.confidence.as_str(),
                candidate.timeout.as_secs()
            );

            dispatcher.emit(FallEvent::detected(
                candidate.magnitude,
                candidate.confidence,
                candidate.velocity_change,
            ));
            dispatcher.haptic(if candidate.confidence == FallConfidence::High {
                HapticKind::Error
            } else {
                HapticKind::Warning
            });

            let pending = notifier.show_local(fall_check_alert(candidate.confidence));
            tokio::spawn(async move {
                if let Err(err) = pending.await {
                    log::warn!("fall-check notification failed: {err}");
                }
            });
        }
        SampleOutcome::Activity { dismissed } => {
            if dismissed {
                log::info!("movement resumed, candidate fall dismissed");
            }
        }
        SampleOutcome::Quiet => {}
    }
}

fn handle_timer(
    detector: &mut FallDetector,
    dispatcher: &Arc<EventDispatcher>,
    notifier: &Arc<dyn NotificationSink>,
) {
    match detector.check_inactivity(Instant::now()) {
        TimerOutcome::Confirmed { inactive } => {
            let inactive_ms = inactive.as_millis() as u64;
            log::error!("🚨 fall confirmed: no movement for {inactive_ms}ms");

            dispatcher.haptic(HapticKind::Error);
            dispatcher.emit(FallEvent::confirmed(inactive_ms));

            let local = notifier.show_local(fall_confirmed_alert());
            let family = notifier.send_to_family(FAMILY_ALERT_MESSAGE.to_string(), true);
            tokio::spawn(async move {
                if let Err(err) = local.await {
                    log::warn!("urgent local notification failed: {err}");
                }
                if let Err(err) = family.await {
                    log::warn!("family escalation failed: {err}");
                }
            });
        }
        TimerOutcome::Lapsed => {
            log::info!("candidate fall lapsed without meeting the stillness requirement");
        }
        TimerOutcome::Idle => {}
    }
}

fn snapshot(detector: &FallDetector) -> EngineStatus {
    let elapsed = detector.last_activity().elapsed();
    let last_activity = Utc::now()
        - chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
    EngineStatus {
        is_active: true,
        fall_detected: detector.candidate_open(),
        last_activity: Some(last_activity),
    }
}
