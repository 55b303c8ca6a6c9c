/// Feedback kinds the device can actuate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticKind {
    Success,
    Warning,
    Error,
}

/// Fire-and-forget haptic feedback.
pub trait HapticsSink: Send + Sync {
    fn notify(&self, kind: HapticKind);
}

/// The service has no actuator of its own; requests are surfaced in the
/// log so the device shell can relay them.
pub struct LogHaptics;

impl HapticsSink for LogHaptics {
    fn notify(&self, kind: HapticKind) {
        log::info!("📳 haptic feedback requested: {:?}", kind);
    }
}
