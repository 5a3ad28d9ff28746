//! Cumulative beam-on timer.
//!
//! One tick per exposure period: +1 while the beam is on, −1 toward zero
//! while it is off. A short excursion into a warning tier therefore heals
//! itself once the beam is blanked.

/// Cumulative beam-on seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExposureTimer {
    seconds: u32,
}

impl ExposureTimer {
    /// Timer at zero.
    pub const fn new() -> Self {
        Self { seconds: 0 }
    }

    /// Timer starting from `seconds`.
    pub const fn with_seconds(seconds: u32) -> Self {
        Self { seconds }
    }

    /// Current count.
    #[inline]
    pub const fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Advance one tick and return the new count.
    pub fn tick(&mut self, beam_on: bool) -> u32 {
        self.seconds = if beam_on {
            self.seconds.saturating_add(1)
        } else {
            self.seconds.saturating_sub(1)
        };
        self.seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_while_beam_on() {
        let mut t = ExposureTimer::new();
        for _ in 0..5 {
            t.tick(true);
        }
        assert_eq!(t.seconds(), 5);
    }

    #[test]
    fn counts_down_to_zero_and_stays() {
        let mut t = ExposureTimer::with_seconds(2);
        assert_eq!(t.tick(false), 1);
        assert_eq!(t.tick(false), 0);
        assert_eq!(t.tick(false), 0);
    }

    #[test]
    fn saturates_at_max() {
        let mut t = ExposureTimer::with_seconds(u32::MAX);
        assert_eq!(t.tick(true), u32::MAX);
    }
}
