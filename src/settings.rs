use futures_util::future::BoxFuture;
use serde::Serialize;

/// User preferences the engine cares about.
#[derive(Debug, Clone, Serialize)]
pub struct UserSettings {
    pub haptic_feedback_enabled: bool,
    pub fall_detection_enabled: bool,
    pub notifications_enabled: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            haptic_feedback_enabled: true,
            fall_detection_enabled: true,
            notifications_enabled: true,
        }
    }
}

/// Supplies user preferences. Providers never fail: when the backing source
/// is unreadable they fall back to the defaults.
pub trait SettingsProvider: Send + Sync {
    fn get(&self) -> BoxFuture<'static, UserSettings>;
}

/// Environment-backed settings (`MILO_*` variables, defaulting to enabled).
pub struct EnvSettings;

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "off" | "no"
        ),
        Err(_) => default,
    }
}

impl SettingsProvider for EnvSettings {
    fn get(&self) -> BoxFuture<'static, UserSettings> {
        let settings = UserSettings {
            haptic_feedback_enabled: env_flag("MILO_HAPTIC_FEEDBACK", true),
            fall_detection_enabled: env_flag("MILO_FALL_DETECTION", true),
            notifications_enabled: env_flag("MILO_NOTIFICATIONS", true),
        };
        Box::pin(async move { settings })
    }
}
