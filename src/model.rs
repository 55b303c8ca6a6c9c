use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// 1. INPUT: raw accelerometer sample, in g-units
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Device capture time in milliseconds.
    #[serde(rename = "t", alias = "timestamp")]
    pub t: f64,
}

impl AccelerationSample {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

// 2. Confidence tier for a candidate fall, derived from the weighted score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallConfidence {
    Low,
    Moderate,
    High,
}

impl FallConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallConfidence::Low => "low",
            FallConfidence::Moderate => "moderate",
            FallConfidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallEventKind {
    FallDetected,
    FallConfirmed,
    UserOk,
}

impl FallEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallEventKind::FallDetected => "fall_detected",
            FallEventKind::FallConfirmed => "fall_confirmed",
            FallEventKind::UserOk => "user_ok",
        }
    }
}

// 3. OUTPUT: an emitted fall event. Immutable once created; the history is
// a log, not a mutable record.
#[derive(Debug, Clone, Serialize)]
pub struct FallEvent {
    #[serde(rename = "type")]
    pub kind: FallEventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<FallConfidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_change: Option<f64>,
}

impl FallEvent {
    pub fn detected(acceleration_g: f64, confidence: FallConfidence, velocity_change: f64) -> Self {
        Self {
            kind: FallEventKind::FallDetected,
            timestamp: Utc::now(),
            acceleration_g: Some(acceleration_g),
            inactive_duration_ms: None,
            confidence: Some(confidence),
            velocity_change: Some(velocity_change),
        }
    }

    /// Escalated fall: the candidate went unanswered. Confidence is fixed
    /// high once the stillness requirement is met.
    pub fn confirmed(inactive_duration_ms: u64) -> Self {
        Self {
            kind: FallEventKind::FallConfirmed,
            timestamp: Utc::now(),
            acceleration_g: None,
            inactive_duration_ms: Some(inactive_duration_ms),
            confidence: Some(FallConfidence::High),
            velocity_change: None,
        }
    }

    pub fn user_ok() -> Self {
        Self {
            kind: FallEventKind::UserOk,
            timestamp: Utc::now(),
            acceleration_g: None,
            inactive_duration_ms: None,
            confidence: None,
            velocity_change: None,
        }
    }
}

// 4. DATABASE: one persisted row of the event log
#[derive(Debug, Serialize, FromRow)]
pub struct FallLog {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub recorded_at: DateTime<Utc>,
    pub acceleration_g: Option<f64>,
    pub inactive_duration_ms: Option<i64>,
    pub confidence: Option<String>,
    pub velocity_change: Option<f64>,
}

// 5. STATUS: read-only snapshot for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_active: bool,
    pub fall_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl EngineStatus {
    pub fn idle() -> Self {
        Self {
            is_active: false,
            fall_detected: false,
            last_activity: None,
        }
    }
}

// 6. DEBUG: severity presets for the simulated-fall hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
}

impl Severity {
    /// Impact magnitude fed through the sample path for each preset.
    pub fn magnitude_g(&self) -> f64 {
        match self {
            Severity::Low => 2.7,
            Severity::Moderate => 3.2,
            Severity::High => 4.0,
        }
    }
}

// 7. INPUT: dashboard command envelope
#[derive(Debug, Deserialize)]
pub struct ClientCommand {
    pub action: String,
    #[serde(default)]
    pub severity: Option<Severity>,
}
