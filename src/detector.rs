use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{AccelerationSample, FallConfidence};

/// Tuning for the detection state machine. Defaults are the production
/// firmware values.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Candidate-fall trigger threshold (g).
    pub fall_threshold_g: f64,
    /// Above this the magnitude factor scores 2 points.
    pub moderate_threshold_g: f64,
    /// Above this the magnitude factor scores 3 points.
    pub high_threshold_g: f64,
    /// Anything above this counts as normal activity (g).
    pub activity_threshold_g: f64,
    /// Rolling window capacity; ~2s of history at the sampling interval.
    pub window_capacity: usize,
    pub sampling_interval: Duration,
    /// Base timeout before an unanswered candidate fall is evaluated.
    /// High-confidence candidates use half of it.
    pub inactivity_timeout: Duration,
    /// Minimum stillness required to confirm a fall at timer expiry.
    pub min_inactive_for_confirm: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fall_threshold_g: 2.5,
            moderate_threshold_g: 3.0,
            high_threshold_g: 3.5,
            activity_threshold_g: 0.5,
            window_capacity: 20,
            sampling_interval: Duration::from_millis(100),
            inactivity_timeout: Duration::from_secs(60),
            min_inactive_for_confirm: Duration::from_secs(30),
        }
    }
}

/// What one processed sample did to the state machine.
#[derive(Debug)]
pub enum SampleOutcome {
    /// Below the activity threshold; nothing changed.
    Quiet,
    /// Normal movement. `dismissed` is set when it closed an open candidate
    /// fall (the person moved, so the candidate was a false positive).
    Activity { dismissed: bool },
    /// A new candidate fall was opened.
    Candidate(CandidateFall),
}

/// A freshly opened candidate fall, ready for escalation handling.
#[derive(Debug, Clone)]
pub struct CandidateFall {
    pub magnitude: f64,
    pub confidence: FallConfidence,
    pub velocity_change: f64,
    pub timeout: Duration,
    /// True when this impact displaced a candidate that was still open.
    pub dismissed_previous: bool,
}

/// Result of evaluating the inactivity deadline.
#[derive(Debug)]
pub enum TimerOutcome {
    /// Candidate still open and the stillness requirement is met.
    Confirmed { inactive: Duration },
    /// Candidate still open but the stillness requirement fell short; the
    /// candidate lapses without an event.
    Lapsed,
    /// No candidate was open.
    Idle,
}

/// An open candidate fall. Holding the deadline here keeps "candidate open"
/// and "timer armed" a single fact that cannot diverge.
struct OpenCandidate {
    deadline: Instant,
}

/// Per-sample fall detection state machine: rolling window, weighted
/// confidence scoring, debounce against renewed movement.
///
/// Purely synchronous; the caller supplies the clock, which keeps every
/// transition deterministic under test.
pub struct FallDetector {
    config: DetectionConfig,
    window: VecDeque<AccelerationSample>,
    candidate: Option<OpenCandidate>,
    last_activity: Instant,
}

impl FallDetector {
    pub fn new(config: DetectionConfig, now: Instant) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_capacity),
            config,
            candidate: None,
            last_activity: now,
        }
    }

    /// Process one sample, in arrival order.
    pub fn observe(&mut self, sample: AccelerationSample, now: Instant) -> SampleOutcome {
        let magnitude = sample.magnitude();

        self.window.push_back(sample);
        if self.window.len() > self.config.window_capacity {
            self.window.pop_front();
        }

        let mut dismissed = false;
        if magnitude > self.config.activity_threshold_g {
            self.last_activity = now;
            dismissed = self.candidate.take().is_some();
        }

        if magnitude > self.config.fall_threshold_g && self.candidate.is_none() {
            let confidence = self.score_confidence(magnitude, &sample);
            let velocity_change = self.velocity_change();
            let timeout = if confidence == FallConfidence::High {
                self.config.inactivity_timeout / 2
            } else {
                self.config.inactivity_timeout
            };
            self.candidate = Some(OpenCandidate {
                deadline: now + timeout,
            });
            return SampleOutcome::Candidate(CandidateFall {
                magnitude,
                confidence,
                velocity_change,
                timeout,
                dismissed_previous: dismissed,
            });
        }

        if magnitude > self.config.activity_threshold_g {
            SampleOutcome::Activity { dismissed }
        } else {
            SampleOutcome::Quiet
        }
    }

    /// Weighted point score bucketed into a confidence tier. The window
    /// already contains `current` as its newest entry.
    fn score_confidence(&self, magnitude: f64, current: &AccelerationSample) -> FallConfidence {
        let mut score = if magnitude > self.config.high_threshold_g {
            3
        } else if magnitude > self.config.moderate_threshold_g {
            2
        } else {
            1
        };

        // Sudden direction change: compare against the mean of the four
        // samples preceding the newest one.
        if self.window.len() >= 5 {
            let n = self.window.len();
            let (mut ax, mut ay, mut az) = (0.0, 0.0, 0.0);
            for prev in self.window.range(n - 5..n - 1) {
                ax += prev.x;
                ay += prev.y;
                az += prev.z;
            }
            ax /= 4.0;
            ay /= 4.0;
            az /= 4.0;

            let delta = (current.x - ax).abs() + (current.y - ay).abs() + (current.z - az).abs();
            if delta > 3.0 {
                score += 2;
            } else if delta > 2.0 {
                score += 1;
            }
        }

        // Falls usually carry a strong vertical component.
        if current.z.abs() > 2.0 {
            score += 1;
        }

        if score >= 5 {
            FallConfidence::High
        } else if score >= 3 {
            FallConfidence::Moderate
        } else {
            FallConfidence::Low
        }
    }

    /// Rough delta-V proxy: summed magnitude of successive sample deltas
    /// across the newest five window entries. Not a physical integration.
    fn velocity_change(&self) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }

        let start = self.window.len().saturating_sub(5);
        let mut total = 0.0;
        let mut prev: Option<&AccelerationSample> = None;
        for sample in self.window.range(start..) {
            if let Some(prev) = prev {
                let dx = sample.x - prev.x;
                let dy = sample.y - prev.y;
                let dz = sample.z - prev.z;
                total += (dx * dx + dy * dy + dz * dz).sqrt();
            }
            prev = Some(sample);
        }
        total
    }

    /// Evaluate the inactivity deadline. Either way the candidate is
    /// closed: confirmation resolves it, a lapse dismisses it.
    pub fn check_inactivity(&mut self, now: Instant) -> TimerOutcome {
        if self.candidate.take().is_none() {
            return TimerOutcome::Idle;
        }

        let inactive = now.duration_since(self.last_activity);
        if inactive >= self.config.min_inactive_for_confirm {
            TimerOutcome::Confirmed { inactive }
        } else {
            TimerOutcome::Lapsed
        }
    }

    /// The user told us they are fine; returns whether a candidate was open.
    pub fn confirm_user_ok(&mut self) -> bool {
        self.candidate.take().is_some()
    }

    pub fn candidate_open(&self) -> bool {
        self.candidate.is_some()
    }

    /// Deadline of the open candidate, if any. At most one is ever pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.candidate.as_ref().map(|c| c.deadline)
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    #[cfg(test)]
    pub(crate) fn window(&self) -> &VecDeque<AccelerationSample> {
        &self.window
    }
}
