//! Monitor configuration: schema, defaults merge, persistence boundary.
//!
//! The core only reads configuration. The settings owner mutates it through
//! [`SharedConfig`] and persists through a [`ConfigStore`], usually behind a
//! [`DebouncedSaver`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tokio::task::JoinHandle;

use crate::capability::Capabilities;
use crate::error::{MonitorError, MonitorResult};

const APP_DIR: &str = "response-monitor";
const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(500);

/// Flat option map, persisted with camelCase keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Master switch
    pub enabled: bool,
    pub alert_on_error: bool,
    pub alert_on_empty: bool,

    pub alert_on_success: bool,
    /// Success cue only while the host is not focused
    pub success_background_only: bool,

    pub sound: bool,
    pub volume: f64,
    pub sound_url: String,
    pub success_volume: f64,
    pub success_sound_url: String,

    pub vibrate: bool,
    pub vib_ms: u32,
    pub vib_repeat: u32,

    pub notify: bool,
    pub notify_title: String,
    pub notify_body: String,
    pub notify_require_interaction: bool,

    pub title_blink: bool,
    pub title_blink_times: u32,
    /// Milliseconds between title toggles
    pub title_blink_gap: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_on_error: true,
            alert_on_empty: true,
            alert_on_success: false,
            success_background_only: false,
            sound: true,
            volume: 0.9,
            sound_url: "./fail.mp3".to_string(),
            success_volume: 0.4,
            success_sound_url: "./success.mp3".to_string(),
            vibrate: false,
            vib_ms: 180,
            vib_repeat: 2,
            notify: false,
            notify_title: "Generation failed".to_string(),
            notify_body: "Possible network/API error or empty response, please check.".to_string(),
            notify_require_interaction: false,
            title_blink: true,
            title_blink_times: 6,
            title_blink_gap: 600,
        }
    }
}

impl MonitorConfig {
    /// Clamp numeric options into their documented ranges.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.volume = clamp_unit(self.volume, defaults.volume);
        self.success_volume = clamp_unit(self.success_volume, defaults.success_volume);
        self.vib_ms = self.vib_ms.clamp(50, 2000);
        self.vib_repeat = self.vib_repeat.clamp(1, 5);
        self.title_blink_times = self.title_blink_times.clamp(2, 20);
        self.title_blink_gap = self.title_blink_gap.clamp(200, 3000);
        self
    }

    /// Turn off channels the platform cannot deliver.
    pub fn restricted_to(mut self, caps: &Capabilities) -> Self {
        if !caps.vibration {
            self.vibrate = false;
        }
        if !caps.notifications_usable() {
            self.notify = false;
        }
        self
    }
}

fn clamp_unit(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Fill keys missing from a stored mapping with defaults, key by key.
///
/// Present keys are kept. A present key of the wrong YAML type is replaced by
/// its default. Unknown keys are ignored.
pub fn merge_defaults(stored: &Mapping) -> MonitorResult<MonitorConfig> {
    let Value::Mapping(mut merged) = serde_yaml::to_value(MonitorConfig::default())? else {
        return Err(MonitorError::config("default configuration is not a mapping"));
    };

    for (key, slot) in merged.iter_mut() {
        let Some(value) = stored.get(key) else {
            continue;
        };
        match coerce_like(value, slot) {
            Some(v) => *slot = v,
            None => tracing::warn!(?key, "ignoring stored option with unexpected type"),
        }
    }

    let config: MonitorConfig = serde_yaml::from_value(Value::Mapping(merged))?;
    Ok(config.normalized())
}

/// `value` converted to the shape of `default`, if compatible.
fn coerce_like(value: &Value, default: &Value) -> Option<Value> {
    match (value, default) {
        (Value::Bool(_), Value::Bool(_)) | (Value::String(_), Value::String(_)) => {
            Some(value.clone())
        }
        (Value::Number(n), Value::Number(d)) if d.is_u64() => {
            let rounded = n.as_f64()?.round();
            if rounded.is_finite() {
                Some(Value::from(rounded.max(0.0).min(u32::MAX as f64) as u64))
            } else {
                None
            }
        }
        (Value::Number(n), Value::Number(_)) => Some(Value::from(n.as_f64()?)),
        _ => None,
    }
}

/// Persistence boundary for configuration.
pub trait ConfigStore: Send + Sync {
    /// Raw stored mapping, `None` when nothing was saved yet.
    fn load(&self) -> MonitorResult<Option<Mapping>>;
    fn save(&self, config: &MonitorConfig) -> MonitorResult<()>;
}

/// YAML file under the user config directory.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/response-monitor/config.yaml`
    pub fn default_location() -> MonitorResult<Self> {
        let dir = dirs_next::config_dir()
            .ok_or_else(|| MonitorError::config("no user config directory on this platform"))?;
        Ok(Self::new(dir.join(APP_DIR).join(CONFIG_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> MonitorResult<Option<Mapping>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_yaml::from_str::<Value>(&text)? {
            Value::Mapping(m) => Ok(Some(m)),
            Value::Null => Ok(None),
            _ => Err(MonitorError::config(format!(
                "{} does not contain a mapping",
                self.path.display()
            ))),
        }
    }

    fn save(&self, config: &MonitorConfig) -> MonitorResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_yaml::to_string(config)?)?;
        Ok(())
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load once at startup: stored values merged over defaults, then restricted
/// to what the platform supports.
pub fn load_config(store: &dyn ConfigStore, caps: &Capabilities) -> MonitorResult<MonitorConfig> {
    let config = match store.load()? {
        Some(stored) => merge_defaults(&stored)?,
        None => MonitorConfig::default(),
    };
    Ok(config.restricted_to(caps))
}

/// Configuration handle shared between the settings owner and the monitor.
pub type SharedConfig = Arc<RwLock<MonitorConfig>>;

pub fn shared(config: MonitorConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

/// Current configuration, tolerating a poisoned lock.
pub fn snapshot(config: &SharedConfig) -> MonitorConfig {
    config.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Coalesces bursts of settings edits into one save after a quiet period.
pub struct DebouncedSaver {
    store: Arc<dyn ConfigStore>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedSaver {
    pub fn new(store: Arc<dyn ConfigStore>, delay: Duration) -> Self {
        Self {
            store,
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule a save of `config`, replacing any save still waiting.
    ///
    /// Outside a tokio runtime the save happens immediately. Failures are logged.
    pub fn schedule(&self, config: MonitorConfig) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            save_logged(self.store.as_ref(), &config);
            return;
        };

        let store = Arc::clone(&self.store);
        let delay = self.delay;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            save_logged(store.as_ref(), &config);
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }
}

fn save_logged(store: &dyn ConfigStore, config: &MonitorConfig) {
    match store.save(config) {
        Ok(()) => tracing::debug!("configuration saved"),
        Err(e) => tracing::warn!(error = %e, "failed to save configuration"),
    }
}
