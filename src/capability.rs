//! Environment Capability Probe
//!
//! Decides once, at startup, which alert channels the host can actually use.

use serde::{Deserialize, Serialize};

/// Raw facts reported by the host environment.
///
/// Browser-like hosts fill this from their navigator; native hosts use
/// [`EnvironmentInfo::current_process`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentInfo {
    pub user_agent: String,
    pub platform: String,
    /// High-entropy platform hint, when the host exposes one
    pub platform_hint: Option<String>,
    pub max_touch_points: u32,
    pub has_vibrate: bool,
    pub has_notification: bool,
    pub has_service_worker: bool,
    /// Display mode reports a standalone (installed) app
    pub display_standalone: bool,
    /// Legacy standalone flag some mobile hosts expose instead
    pub legacy_standalone: Option<bool>,
}

impl EnvironmentInfo {
    /// Facts for a native desktop process. Desktop sessions can notify but not vibrate.
    pub fn current_process() -> Self {
        Self {
            user_agent: format!("response-monitor/{}", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_string(),
            platform_hint: None,
            max_touch_points: 0,
            has_vibrate: false,
            has_notification: true,
            has_service_worker: false,
            display_standalone: true,
            legacy_standalone: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    /// Touch-first mobile family that needs special-casing (no web vibration,
    /// notifications only from an installed app)
    MobileTouch,
    Other,
}

/// Read-only capability flags, computed once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub platform: PlatformFamily,
    pub vibration: bool,
    pub notifications: bool,
    pub service_worker: bool,
    pub standalone: bool,
}

const MOBILE_DEVICES: [&str; 3] = ["iPad", "iPhone", "iPod"];

impl Capabilities {
    pub fn probe(env: &EnvironmentInfo) -> Self {
        let mobile = MOBILE_DEVICES.iter().any(|d| env.user_agent.contains(d))
            || env.platform_hint.as_deref() == Some("iOS")
            // desktop-class tablets report a Mac platform with touch points
            || (env.platform.contains("Mac") && env.max_touch_points > 1);

        let platform = if mobile {
            PlatformFamily::MobileTouch
        } else {
            PlatformFamily::Other
        };

        Self {
            platform,
            vibration: env.has_vibrate && !mobile,
            notifications: env.has_notification,
            service_worker: env.has_service_worker,
            standalone: env.display_standalone || env.legacy_standalone.unwrap_or(false),
        }
    }

    /// Whether system notifications can be shown at all on this platform.
    pub fn notifications_usable(&self) -> bool {
        if self.is_mobile_touch() {
            self.notifications && self.service_worker && self.standalone
        } else {
            self.notifications
        }
    }

    pub fn is_mobile_touch(&self) -> bool {
        self.platform == PlatformFamily::MobileTouch
    }
}
