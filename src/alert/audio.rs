//! Audible alerts as an ordered chain of providers.
//!
//! Each provider either plays the cue or reports why it could not; the chain
//! moves on to the next one. The last resort is a plain tone.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::error::AlertError;

pub const FAILURE_TONE_HZ: u32 = 880;
pub const SUCCESS_TONE_HZ: u32 = 1320;
pub const SUCCESS_TONE_MS: u32 = 120;

/// How long a player gets to reject the file before playback counts as started.
pub const PLAYER_STARTUP_WINDOW: Duration = Duration::from_millis(150);
const PLAYER_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueKind {
    Failure,
    Success,
}

/// Everything a provider needs to make a sound.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCue {
    pub kind: CueKind,
    /// 0.0..=1.0
    pub volume: f64,
    /// Sound file location, relative paths resolve against the working directory
    pub source: String,
    pub tone_hz: u32,
    pub tone_ms: u32,
}

impl AlertCue {
    pub fn from_config(kind: CueKind, cfg: &MonitorConfig) -> Self {
        let defaults = MonitorConfig::default();
        match kind {
            CueKind::Failure => Self {
                kind,
                volume: unit_or(cfg.volume, defaults.volume),
                source: non_empty_or(&cfg.sound_url, &defaults.sound_url),
                tone_hz: FAILURE_TONE_HZ,
                tone_ms: cfg.vib_ms.clamp(120, 1000),
            },
            CueKind::Success => Self {
                kind,
                volume: unit_or(cfg.success_volume, defaults.success_volume),
                source: non_empty_or(&cfg.success_sound_url, &defaults.success_sound_url),
                tone_hz: SUCCESS_TONE_HZ,
                tone_ms: SUCCESS_TONE_MS,
            },
        }
    }
}

fn unit_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

pub trait AudioProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn play(&self, cue: &AlertCue) -> Result<(), AlertError>;
}

#[derive(Default)]
pub struct AudioChain {
    providers: Vec<Box<dyn AudioProvider>>,
}

impl AudioChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl AudioProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Sound file through the platform player, then the terminal bell.
    pub fn native() -> Self {
        Self::new().with(FilePlayer::detect()).with(TerminalBell)
    }

    /// Try providers in order. Returns the name of the one that played.
    pub fn play(&self, cue: &AlertCue) -> Option<&'static str> {
        for provider in &self.providers {
            match provider.play(cue) {
                Ok(()) => return Some(provider.name()),
                Err(e) => tracing::debug!(provider = provider.name(), error = %e, "audio provider failed"),
            }
        }
        None
    }
}

/// Plays the cue's sound file with whatever command-line player the OS ships.
#[derive(Debug, Clone)]
pub struct FilePlayer {
    program: Option<&'static str>,
}

impl FilePlayer {
    pub fn detect() -> Self {
        let program = match std::env::consts::OS {
            "macos" => Some("afplay"),
            "linux" | "freebsd" | "openbsd" => Some("paplay"),
            _ => None,
        };
        Self { program }
    }

    pub fn with_program(program: &'static str) -> Self {
        Self {
            program: Some(program),
        }
    }

    fn args(program: &str, cue: &AlertCue, path: &str) -> Vec<String> {
        match program {
            "afplay" => vec!["-v".to_string(), format!("{:.2}", cue.volume), path.to_string()],
            "paplay" => vec![
                format!("--volume={}", (cue.volume * 65536.0).round() as u32),
                path.to_string(),
            ],
            _ => vec![path.to_string()],
        }
    }
}

impl AudioProvider for FilePlayer {
    fn name(&self) -> &'static str {
        "file"
    }

    fn play(&self, cue: &AlertCue) -> Result<(), AlertError> {
        let program = self
            .program
            .ok_or_else(|| AlertError::unavailable("file", "no player for this platform"))?;
        let path = PathBuf::from(&cue.source);
        if !path.is_file() {
            return Err(AlertError::unavailable(
                "file",
                format!("{} not found", path.display()),
            ));
        }
        let path = path.to_string_lossy();

        let child = Command::new(program)
            .args(Self::args(program, cue, &path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| AlertError::Io {
                channel: "file",
                source,
            })?;
        await_startup(program, child)
    }
}

/// Players that cannot open or decode the file exit almost at once. Anything
/// still running after the startup window is playing and gets reaped in the
/// background.
fn await_startup(program: &str, mut child: Child) -> Result<(), AlertError> {
    let deadline = Instant::now() + PLAYER_STARTUP_WINDOW;
    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => return Ok(()),
            Ok(Some(status)) => {
                return Err(AlertError::unavailable(
                    "file",
                    format!("{program} exited with {status}"),
                ))
            }
            Ok(None) if Instant::now() >= deadline => {
                thread::spawn(move || {
                    let _ = child.wait();
                });
                return Ok(());
            }
            Ok(None) => thread::sleep(PLAYER_POLL),
            Err(source) => {
                return Err(AlertError::Io {
                    channel: "file",
                    source,
                })
            }
        }
    }
}

/// Tone fallback for terminals: the BEL character.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl AudioProvider for TerminalBell {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn play(&self, cue: &AlertCue) -> Result<(), AlertError> {
        if cue.volume <= 0.0 {
            return Ok(());
        }
        let mut err = std::io::stderr().lock();
        err.write_all(b"\x07")
            .and_then(|_| err.flush())
            .map_err(|source| AlertError::Io {
                channel: "bell",
                source,
            })
    }
}
