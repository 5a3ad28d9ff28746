//! Safety tiers and the lockout ratchet.
//!
//! | Tier | Exposure seconds |
//! |---|---|
//! | Normal | `[0, 300)` |
//! | CautionRising | `[300, 390)` |
//! | CautionSteady | `[390, 480)` |
//! | DangerRising | `[480, 570)` |
//! | Locked | `[570, ∞)` |
//!
//! The monitor only ever *sets* the lockout flag. Falling out of `Locked`
//! never clears it; only a successful unlock does.

use serde::{Deserialize, Serialize};

/// Safety tier derived from the exposure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SafetyTier {
    /// Below every threshold.
    #[default]
    Normal,
    /// First warning.
    CautionRising,
    /// Sustained warning.
    CautionSteady,
    /// Approaching lockout.
    DangerRising,
    /// Ratchet engaged.
    Locked,
}

/// Lower bounds of each tier above `Normal` [s].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub caution_rising: u32,
    pub caution_steady: u32,
    pub danger_rising: u32,
    pub locked: u32,
}

impl TierThresholds {
    /// 5 min, 6.5 min, 8 min, 9.5 min.
    pub const DEFAULT: Self = Self {
        caution_rising: 300,
        caution_steady: 390,
        danger_rising: 480,
        locked: 570,
    };

    /// Tier for `seconds` using half-open intervals.
    pub const fn tier(&self, seconds: u32) -> SafetyTier {
        if seconds >= self.locked {
            SafetyTier::Locked
        } else if seconds >= self.danger_rising {
            SafetyTier::DangerRising
        } else if seconds >= self.caution_steady {
            SafetyTier::CautionSteady
        } else if seconds >= self.caution_rising {
            SafetyTier::CautionRising
        } else {
            SafetyTier::Normal
        }
    }

    /// Thresholds must be positive and strictly increasing.
    pub fn validate(&self) -> Result<(), String> {
        let ordered = 0 < self.caution_rising
            && self.caution_rising < self.caution_steady
            && self.caution_steady < self.danger_rising
            && self.danger_rising < self.locked;
        if ordered {
            Ok(())
        } else {
            Err(format!(
                "thresholds must be strictly increasing and positive: {}/{}/{}/{}",
                self.caution_rising, self.caution_steady, self.danger_rising, self.locked
            ))
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

static_assertions::const_assert!(
    TierThresholds::DEFAULT.caution_rising < TierThresholds::DEFAULT.caution_steady
        && TierThresholds::DEFAULT.caution_steady < TierThresholds::DEFAULT.danger_rising
        && TierThresholds::DEFAULT.danger_rising < TierThresholds::DEFAULT.locked
);

/// Result of one threshold evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierEvaluation {
    /// Tier for the current count.
    pub tier: SafetyTier,
    /// Tier differs from the previous evaluation.
    pub changed: bool,
    /// The lockout flag must be set.
    pub engage_lockout: bool,
}

/// Re-evaluates the tier on every exposure tick.
#[derive(Debug, Clone)]
pub struct ThresholdMonitor {
    thresholds: TierThresholds,
    last_tier: SafetyTier,
    last_seconds: u32,
}

impl ThresholdMonitor {
    /// Monitor starting in `Normal`.
    pub const fn new(thresholds: TierThresholds) -> Self {
        Self {
            thresholds,
            last_tier: SafetyTier::Normal,
            last_seconds: 0,
        }
    }

    /// Tier from the last evaluation.
    #[inline]
    pub const fn tier(&self) -> SafetyTier {
        self.last_tier
    }

    /// Configured thresholds.
    #[inline]
    pub const fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// Evaluate the current count.
    ///
    /// Lockout is engaged on entry into `Locked` and on every tick that does
    /// not decrease the count while in `Locked`, so an unlock granted above
    /// the threshold is revoked as soon as the beam accumulates again.
    pub fn evaluate(&mut self, seconds: u32) -> TierEvaluation {
        let tier = self.thresholds.tier(seconds);
        let changed = tier != self.last_tier;
        let engage_lockout =
            tier == SafetyTier::Locked && (changed || seconds >= self.last_seconds);

        self.last_tier = tier;
        self.last_seconds = seconds;

        TierEvaluation {
            tier,
            changed,
            engage_lockout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: TierThresholds = TierThresholds::DEFAULT;

    #[test]
    fn boundary_values() {
        assert_eq!(T.tier(0), SafetyTier::Normal);
        assert_eq!(T.tier(299), SafetyTier::Normal);
        assert_eq!(T.tier(300), SafetyTier::CautionRising);
        assert_eq!(T.tier(389), SafetyTier::CautionRising);
        assert_eq!(T.tier(390), SafetyTier::CautionSteady);
        assert_eq!(T.tier(479), SafetyTier::CautionSteady);
        assert_eq!(T.tier(480), SafetyTier::DangerRising);
        assert_eq!(T.tier(569), SafetyTier::DangerRising);
        assert_eq!(T.tier(570), SafetyTier::Locked);
        assert_eq!(T.tier(u32::MAX), SafetyTier::Locked);
    }

    #[test]
    fn validate_rejects_unordered() {
        assert!(T.validate().is_ok());
        let bad = TierThresholds {
            danger_rising: 600,
            ..T
        };
        assert!(bad.validate().is_err());
        let zero = TierThresholds {
            caution_rising: 0,
            ..T
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn repeated_tier_is_not_a_change() {
        let mut m = ThresholdMonitor::new(T);
        assert!(m.evaluate(300).changed);
        assert!(!m.evaluate(301).changed);
        assert!(!m.evaluate(300).changed);
        assert!(m.evaluate(299).changed);
    }

    #[test]
    fn crossing_into_locked_engages() {
        let mut m = ThresholdMonitor::new(T);
        assert!(!m.evaluate(569).engage_lockout);
        let e = m.evaluate(570);
        assert!(e.changed);
        assert!(e.engage_lockout);
    }

    #[test]
    fn draining_inside_locked_does_not_reengage() {
        let mut m = ThresholdMonitor::new(T);
        m.evaluate(575);
        assert!(!m.evaluate(574).engage_lockout);
        assert!(!m.evaluate(573).engage_lockout);
        // Accumulating again re-engages.
        assert!(m.evaluate(574).engage_lockout);
    }

    proptest! {
        #[test]
        fn tier_is_monotonic(a in 0u32..2000, b in 0u32..2000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(T.tier(lo) <= T.tier(hi));
        }

        #[test]
        fn only_locked_tier_engages(seq in proptest::collection::vec(0u32..1200, 1..64)) {
            let mut m = ThresholdMonitor::new(T);
            for s in seq {
                let e = m.evaluate(s);
                if e.engage_lockout {
                    prop_assert_eq!(e.tier, SafetyTier::Locked);
                }
            }
        }
    }
}
