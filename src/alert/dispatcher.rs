//! Stock alert dispatcher: fans a classification out to every enabled channel.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::audio::{AlertCue, AudioChain, CueKind};
use super::notify::{ensure_permission, notification_tag, Notification, Notifier, TerminalNotifier};
use super::title::{blink_title, TerminalTitle, TitleBar};
use super::vibration::{vibration_pattern, Vibrator};
use super::AlertDispatcher;
use crate::capability::Capabilities;
use crate::config::{snapshot, MonitorConfig, SharedConfig};
use crate::round::{Clock, SystemClock};

/// Minimum spacing between two audio cues.
pub const CUE_SPACING: Duration = Duration::from_millis(400);

pub struct ChannelDispatcher {
    config: SharedConfig,
    caps: Capabilities,
    clock: Arc<dyn Clock>,
    audio: AudioChain,
    vibrator: Option<Arc<dyn Vibrator>>,
    notifier: Option<Arc<dyn Notifier>>,
    title: Option<Arc<dyn TitleBar>>,
    last_cue: Mutex<Option<Instant>>,
}

impl ChannelDispatcher {
    /// A dispatcher with no channels attached.
    pub fn new(config: SharedConfig, caps: Capabilities) -> Self {
        Self {
            config,
            caps,
            clock: Arc::new(SystemClock),
            audio: AudioChain::new(),
            vibrator: None,
            notifier: None,
            title: None,
            last_cue: Mutex::new(None),
        }
    }

    /// Channels available to a terminal process.
    pub fn native(config: SharedConfig, caps: Capabilities) -> Self {
        Self::new(config, caps)
            .with_audio(AudioChain::native())
            .with_notifier(Arc::new(TerminalNotifier))
            .with_title_bar(Arc::new(TerminalTitle::new("response-monitor")))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audio(mut self, audio: AudioChain) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_vibrator(mut self, vibrator: Arc<dyn Vibrator>) -> Self {
        self.vibrator = Some(vibrator);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_title_bar(mut self, title: Arc<dyn TitleBar>) -> Self {
        self.title = Some(title);
        self
    }

    fn play(&self, kind: CueKind, cfg: &MonitorConfig, forced: bool) {
        match kind {
            CueKind::Failure if !cfg.sound && !forced => return,
            CueKind::Success if !cfg.alert_on_success && !forced => return,
            _ => {}
        }

        {
            let now = self.clock.now();
            let mut last = self.last_cue.lock().unwrap_or_else(|e| e.into_inner());
            if !forced && last.is_some_and(|at| now.duration_since(at) < CUE_SPACING) {
                tracing::debug!("audio cue suppressed, too soon after the last one");
                return;
            }
            *last = Some(now);
        }

        let cue = AlertCue::from_config(kind, cfg);
        match self.audio.play(&cue) {
            Some(provider) => tracing::debug!(provider, ?kind, "audio cue played"),
            None => tracing::warn!(?kind, "no audio provider could play the cue"),
        }
    }

    fn vibrate(&self, cfg: &MonitorConfig) {
        if !cfg.vibrate || !self.caps.vibration {
            return;
        }
        let Some(vibrator) = &self.vibrator else {
            return;
        };
        if let Err(e) = vibrator.vibrate(&vibration_pattern(cfg.vib_ms, cfg.vib_repeat)) {
            tracing::warn!(error = %e, "vibration failed");
        }
    }

    fn notify(&self, cfg: &MonitorConfig, detail: Option<&str>) {
        if !cfg.notify || !self.caps.notifications_usable() {
            return;
        }
        let Some(notifier) = self.notifier.clone() else {
            return;
        };

        let notification = Notification {
            title: cfg.notify_title.clone(),
            body: detail.unwrap_or(cfg.notify_body.as_str()).to_string(),
            tag: notification_tag(unix_millis()),
            renotify: true,
            require_interaction: cfg.notify_require_interaction,
        };

        spawn_detached("notification", async move {
            if !ensure_permission(notifier.as_ref()).await {
                tracing::debug!("notification permission not granted");
                return;
            }
            if let Err(e) = notifier.show(&notification) {
                tracing::warn!(error = %e, "notification failed");
            }
        });
    }

    fn blink(&self, cfg: &MonitorConfig, reason: &str) {
        if !cfg.title_blink {
            return;
        }
        let Some(bar) = self.title.clone() else {
            return;
        };
        let message = format!("[{reason}] {}", bar.title());
        let times = cfg.title_blink_times;
        let gap = Duration::from_millis(u64::from(cfg.title_blink_gap));
        spawn_detached("title blink", blink_title(bar, message, times, gap));
    }
}

impl AlertDispatcher for ChannelDispatcher {
    fn raise_failure(&self, reason: &str, detail: Option<&str>) {
        let cfg = snapshot(&self.config);
        if !cfg.enabled {
            return;
        }
        tracing::info!(reason, "raising failure alert");
        self.play(CueKind::Failure, &cfg, false);
        self.vibrate(&cfg);
        self.notify(&cfg, detail);
        self.blink(&cfg, reason);
    }

    fn raise_success(&self, is_test: bool) {
        let cfg = snapshot(&self.config);
        if !cfg.enabled {
            return;
        }
        tracing::info!(is_test, "raising success alert");
        self.play(CueKind::Success, &cfg, is_test);
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Run on the ambient tokio runtime; without one the channel is skipped.
fn spawn_detached<F>(channel: &'static str, task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => tracing::debug!(channel, "no async runtime, channel skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::audio::AudioProvider;
    use crate::alert::notify::Permission;
    use crate::capability::{EnvironmentInfo, PlatformFamily};
    use crate::config::shared;
    use crate::error::AlertError;
    use futures::future::{self, BoxFuture};

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, s: impl Into<String>) {
            self.0.lock().unwrap().push(s.into());
        }
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Speaker(Log);
    impl AudioProvider for Speaker {
        fn name(&self) -> &'static str {
            "speaker"
        }
        fn play(&self, cue: &AlertCue) -> Result<(), AlertError> {
            self.0.push(format!("audio:{:?}", cue.kind));
            Ok(())
        }
    }

    struct Buzzer(Log);
    impl Vibrator for Buzzer {
        fn vibrate(&self, pattern: &[u32]) -> Result<(), AlertError> {
            self.0.push(format!("vibrate:{pattern:?}"));
            Ok(())
        }
    }

    struct Popup(Log);
    impl Notifier for Popup {
        fn permission(&self) -> Permission {
            Permission::Granted
        }
        fn request_permission(&self) -> BoxFuture<'_, Permission> {
            Box::pin(future::ready(Permission::Granted))
        }
        fn show(&self, n: &Notification) -> Result<(), AlertError> {
            self.0.push(format!("notify:{}:{}", n.title, n.body));
            Ok(())
        }
    }

    struct Title(Log);
    impl TitleBar for Title {
        fn title(&self) -> String {
            "Chat".to_string()
        }
        fn set_title(&self, title: &str) -> Result<(), AlertError> {
            self.0.push(format!("title:{title}"));
            Ok(())
        }
    }

    struct Broken;
    impl Vibrator for Broken {
        fn vibrate(&self, _pattern: &[u32]) -> Result<(), AlertError> {
            Err(AlertError::unavailable("vibration", "motor missing"))
        }
    }

    fn everything_on() -> MonitorConfig {
        MonitorConfig {
            vibrate: true,
            notify: true,
            alert_on_success: true,
            title_blink_times: 2,
            ..Default::default()
        }
    }

    fn android_caps() -> Capabilities {
        let caps = Capabilities::probe(&EnvironmentInfo {
            has_vibrate: true,
            has_notification: true,
            ..Default::default()
        });
        assert_eq!(caps.platform, PlatformFamily::Other);
        caps
    }

    fn dispatcher(cfg: MonitorConfig, log: &Log) -> ChannelDispatcher {
        ChannelDispatcher::new(shared(cfg), android_caps())
            .with_audio(AudioChain::new().with(Speaker(log.clone())))
            .with_vibrator(Arc::new(Buzzer(log.clone())))
            .with_notifier(Arc::new(Popup(log.clone())))
            .with_title_bar(Arc::new(Title(log.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_uses_every_channel() {
        let log = Log::default();
        let d = dispatcher(everything_on(), &log);
        d.raise_failure("Empty response", Some("nothing came back"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let entries = log.entries();
        assert_eq!(entries[0], "audio:Failure");
        assert_eq!(entries[1], "vibrate:[180, 100, 180]");
        assert!(entries.contains(&"notify:Generation failed:nothing came back".to_string()));
        assert!(entries.contains(&"title:[Empty response] Chat".to_string()));
        assert_eq!(entries.last().unwrap(), "title:Chat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_master_switch() {
        let log = Log::default();
        let d = dispatcher(
            MonitorConfig {
                enabled: false,
                ..everything_on()
            },
            &log,
        );
        d.raise_failure("Request failed", None);
        d.raise_success(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_cues_are_spaced() {
        let log = Log::default();
        let d = dispatcher(
            MonitorConfig {
                title_blink: false,
                vibrate: false,
                notify: false,
                ..everything_on()
            },
            &log,
        );
        d.raise_failure("Request failed", None);
        d.raise_failure("Request failed", None);
        d.raise_success(false);
        assert_eq!(log.entries(), vec!["audio:Failure"]);
        // tests bypass spacing
        d.raise_success(true);
        assert_eq!(log.entries(), vec!["audio:Failure", "audio:Success"]);
    }

    #[test]
    fn test_success_requires_switch_unless_test() {
        let log = Log::default();
        let d = dispatcher(MonitorConfig::default(), &log);
        d.raise_success(false);
        assert!(log.entries().is_empty());
        d.raise_success(true);
        assert_eq!(log.entries(), vec!["audio:Success"]);
    }

    #[test]
    fn test_sound_switch_and_unsupported_vibration() {
        let log = Log::default();
        let cfg = MonitorConfig {
            sound: false,
            vibrate: true,
            title_blink: false,
            ..Default::default()
        };
        // desktop caps: no vibration
        let d = ChannelDispatcher::new(shared(cfg), Capabilities::probe(&EnvironmentInfo::default()))
            .with_audio(AudioChain::new().with(Speaker(log.clone())))
            .with_vibrator(Arc::new(Buzzer(log.clone())));
        d.raise_failure("Request failed", None);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_channel_failure_is_contained() {
        let log = Log::default();
        let d = ChannelDispatcher::new(shared(everything_on()), android_caps())
            .with_vibrator(Arc::new(Broken))
            .with_audio(AudioChain::new().with(Speaker(log.clone())));
        // no runtime: notification and blink are skipped, nothing panics
        d.raise_failure("Request failed", None);
        assert_eq!(log.entries(), vec!["audio:Failure"]);
    }
}
