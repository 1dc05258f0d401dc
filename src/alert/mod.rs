//! Alert channels.
//!
//! The monitor only ever talks to an [`AlertDispatcher`]. [`ChannelDispatcher`]
//! is the stock implementation fanning out to audio, vibration, system
//! notification and title blinking.

pub mod audio;
pub mod dispatcher;
pub mod notify;
pub mod title;
pub mod vibration;

pub use audio::{AlertCue, AudioChain, AudioProvider, CueKind, FilePlayer, TerminalBell};
pub use dispatcher::ChannelDispatcher;
pub use notify::{Notification, Notifier, Permission, TerminalNotifier};
pub use title::{blink_title, TerminalTitle, TitleBar};
pub use vibration::{vibration_pattern, Vibrator};

/// Boundary between the monitor core and the alert subsystems.
///
/// Implementations must not panic or block; every channel failure stays inside.
pub trait AlertDispatcher: Send + Sync {
    /// Failure path: audio, vibration, notification, title blink.
    fn raise_failure(&self, reason: &str, detail: Option<&str>);

    /// Success path: audio only. `is_test` bypasses rate limiting and the success switch.
    fn raise_success(&self, is_test: bool);
}
