//! Keyboard chord for the manual test alert.

use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

/// A key press with modifiers, keyed by physical key code (`KeyB`, `F9`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub code: String,
}

impl KeyChord {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            ctrl: false,
            alt: false,
            shift: false,
            code: normalize_code(&code.into()),
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

impl Default for KeyChord {
    /// Alt+Shift+B
    fn default() -> Self {
        Self::new("KeyB").alt().shift()
    }
}

/// Bare letters and digits become key codes: `b` -> `KeyB`, `7` -> `Digit7`.
fn normalize_code(code: &str) -> String {
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => format!("Key{}", c.to_ascii_uppercase()),
        (Some(c), None) if c.is_ascii_digit() => format!("Digit{c}"),
        _ => code.to_string(),
    }
}

impl FromStr for KeyChord {
    type Err = MonitorError;

    /// Parses `Alt+Shift+B` style chords.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chord = KeyChord::new("");
        let mut key = None;
        for part in s.split('+').map(str::trim) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => chord.ctrl = true,
                "alt" | "option" => chord.alt = true,
                "shift" => chord.shift = true,
                "" => return Err(MonitorError::config(format!("empty key in chord {s:?}"))),
                _ if key.is_some() => {
                    return Err(MonitorError::config(format!("more than one key in chord {s:?}")))
                }
                _ => key = Some(part),
            }
        }
        let key = key.ok_or_else(|| MonitorError::config(format!("no key in chord {s:?}")))?;
        chord.code = normalize_code(key);
        Ok(chord)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            write!(f, "Ctrl+")?;
        }
        if self.alt {
            write!(f, "Alt+")?;
        }
        if self.shift {
            write!(f, "Shift+")?;
        }
        write!(f, "{}", self.code)
    }
}
