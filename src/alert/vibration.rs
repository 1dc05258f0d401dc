//! Vibration pattern for the failure path.

use crate::error::AlertError;

/// Pause between pulses.
pub const VIBRATION_GAP_MS: u32 = 100;

/// `[pulse, gap, pulse, ...]` with the pulse clamped to 50..=2000 ms and the
/// count to 1..=5.
pub fn vibration_pattern(pulse_ms: u32, repeat: u32) -> Vec<u32> {
    let pulse = pulse_ms.clamp(50, 2000);
    let count = repeat.clamp(1, 5);
    let mut pattern = Vec::with_capacity(count as usize * 2 - 1);
    for i in 0..count {
        if i > 0 {
            pattern.push(VIBRATION_GAP_MS);
        }
        pattern.push(pulse);
    }
    pattern
}

/// Host hook for devices that can vibrate.
pub trait Vibrator: Send + Sync {
    fn vibrate(&self, pattern: &[u32]) -> Result<(), AlertError>;
}
