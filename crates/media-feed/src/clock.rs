//! Playback position sources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read-only view of the playback position, in seconds.
pub trait PlaybackClock: Send + Sync {
    fn position(&self) -> f64;
}

/// A position set from the outside (player callbacks, simulators, tests).
///
/// Cloning shares the same position.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(position: f64) -> Self {
        let clock = Self::default();
        clock.set(position);
        clock
    }

    /// Set the position. Negative and non-finite values clamp to zero.
    pub fn set(&self, position: f64) {
        let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        self.bits.store(position.to_bits(), Ordering::Relaxed);
    }

    /// Move the position forward by `seconds` and return the new value.
    pub fn advance(&self, seconds: f64) -> f64 {
        let next = self.position() + seconds;
        self.set(next);
        self.position()
    }
}

impl PlaybackClock for ManualClock {
    fn position(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_position() {
        let clock = ManualClock::new(3.5);
        let view = clock.clone();
        clock.advance(1.5);
        assert_eq!(view.position(), 5.0);
    }

    #[test]
    fn invalid_positions_clamp_to_zero() {
        let clock = ManualClock::new(-4.0);
        assert_eq!(clock.position(), 0.0);
        clock.set(f64::NAN);
        assert_eq!(clock.position(), 0.0);
    }
}
