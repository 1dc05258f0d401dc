//! Title-bar flashing.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AlertError;

pub const MIN_BLINK_GAP: Duration = Duration::from_millis(200);

pub trait TitleBar: Send + Sync {
    fn title(&self) -> String;
    fn set_title(&self, title: &str) -> Result<(), AlertError>;
}

/// Alternate between `message` and the original title `times` times, then restore.
pub async fn blink_title(bar: Arc<dyn TitleBar>, message: String, times: u32, gap: Duration) {
    let original = bar.title();
    let mut left = times.max(1);
    let mut showing_message = false;

    let mut ticker = tokio::time::interval(gap.max(MIN_BLINK_GAP));
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let next = if showing_message { &original } else { &message };
        if let Err(e) = bar.set_title(next) {
            tracing::warn!(error = %e, "title blink stopped");
            break;
        }
        showing_message = !showing_message;
        left -= 1;
        if left == 0 {
            break;
        }
    }

    if let Err(e) = bar.set_title(&original) {
        tracing::warn!(error = %e, "failed to restore title");
    }
}

/// Sets the terminal window title with an OSC escape sequence.
#[derive(Debug)]
pub struct TerminalTitle {
    current: Mutex<String>,
}

impl TerminalTitle {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: Mutex::new(initial.into()),
        }
    }
}

impl TitleBar for TerminalTitle {
    fn title(&self) -> String {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_title(&self, title: &str) -> Result<(), AlertError> {
        let mut err = std::io::stderr().lock();
        write!(err, "\x1b]0;{title}\x07")
            .and_then(|_| err.flush())
            .map_err(|source| AlertError::Io {
                channel: "title",
                source,
            })?;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = title.to_string();
        Ok(())
    }
}
