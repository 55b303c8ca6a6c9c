use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::engine::FallEventCallback;
use crate::model::{FallConfidence, FallEvent};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    High,
    Max,
}

/// A local notification: what the device shows the senior.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub title: String,
    pub body: String,
    /// Notification category; `fall-check` exposes the "I'm fine" /
    /// "send help" actions on the device.
    pub category: String,
    pub priority: AlertPriority,
    pub data: serde_json::Value,
}

/// Delivers alerts: immediately on this device, and best-effort to family
/// devices. Both paths may fail; callers log and move on.
pub trait NotificationSink: Send + Sync {
    fn show_local(&self, alert: Alert) -> BoxFuture<'static, Result<(), NotifyError>>;

    fn send_to_family(
        &self,
        message: String,
        urgent: bool,
    ) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Copy for the three escalation tiers of the "are you OK?" check.
pub fn fall_check_alert(confidence: FallConfidence) -> Alert {
    let (title, body, priority) = match confidence {
        FallConfidence::Low => (
            "Did you stumble? 🤔",
            "I noticed a bump. Tap here if you need help.",
            AlertPriority::High,
        ),
        FallConfidence::Moderate => (
            "Are you okay? 🤕",
            "Looks like you took a hard bump. Tap to confirm you're alright.",
            AlertPriority::Max,
        ),
        FallConfidence::High => (
            "🚨 Are you hurt?",
            "Detected a serious fall. Tap NOW if you're okay, or we'll alert your family.",
            AlertPriority::Max,
        ),
    };

    Alert {
        title: title.to_string(),
        body: body.to_string(),
        category: "fall-check".to_string(),
        priority,
        data: json!({ "confidence": confidence }),
    }
}

/// The urgent alert raised once a fall is confirmed.
pub fn fall_confirmed_alert() -> Alert {
    Alert {
        title: "🚨 URGENT: Fall Alert".to_string(),
        body: "A fall was detected with no response. Check on them immediately!".to_string(),
        category: "fall-check".to_string(),
        priority: AlertPriority::Max,
        data: json!({ "type": "emergency_fall", "urgent": true }),
    }
}

pub const FAMILY_ALERT_MESSAGE: &str =
    "A fall was detected with no response. Check on them immediately!";

/// Fans alerts out to every connected dashboard over the broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<String>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    fn publish(&self, payload: String) -> Result<(), NotifyError> {
        self.tx
            .send(payload)
            .map(|_| ())
            .map_err(|_| NotifyError::Delivery("no connected dashboard".to_string()))
    }
}

impl NotificationSink for BroadcastNotifier {
    fn show_local(&self, alert: Alert) -> BoxFuture<'static, Result<(), NotifyError>> {
        let result = self.publish(json!({ "type": "LOCAL_ALERT", "alert": alert }).to_string());
        Box::pin(async move { result })
    }

    fn send_to_family(
        &self,
        message: String,
        urgent: bool,
    ) -> BoxFuture<'static, Result<(), NotifyError>> {
        let result = self.publish(
            json!({ "type": "FAMILY_ALERT", "message": message, "urgent": urgent }).to_string(),
        );
        Box::pin(async move { result })
    }
}

/// Adapts the dashboard broadcast channel into an engine observer: every
/// emitted event is mirrored to connected clients as JSON.
pub fn broadcast_observer(tx: broadcast::Sender<String>) -> FallEventCallback {
    Box::new(move |event: &FallEvent| {
        let _ = tx.send(json!({ "type": "FALL_EVENT", "event": event }).to_string());
    })
}
