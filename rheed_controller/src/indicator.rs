//! Indicator lamps.
//!
//! Five lamps show the controller's condition:
//!
//! | Lamp | Meaning |
//! |---|---|
//! | green | ready for a new run |
//! | blue | run in progress (blinks after an operator abort) |
//! | white | operator input needed (steady in Verify, blinking in Lockout) |
//! | yellow | exposure warning |
//! | red | exposure danger / lockout |
//!
//! A [`LampPlan`] is a pure function of state, abort flag and tier. The
//! [`Indicator`] owns the shared blink phase and only restarts it when the
//! plan actually changes.

use bitflags::bitflags;

use crate::safety::threshold::SafetyTier;
use crate::state::ControllerState;

bitflags! {
    /// Set of lamps currently lit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LampSet: u8 {
        const GREEN  = 0b0000_0001;
        const BLUE   = 0b0000_0010;
        const WHITE  = 0b0000_0100;
        const YELLOW = 0b0000_1000;
        const RED    = 0b0001_0000;
    }
}

/// One indicator lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lamp {
    Green,
    Blue,
    White,
    Yellow,
    Red,
}

impl Lamp {
    /// All lamps in panel order.
    pub const ALL: [Lamp; 5] = [Lamp::Green, Lamp::Blue, Lamp::White, Lamp::Yellow, Lamp::Red];

    /// Bit for this lamp.
    pub const fn flag(self) -> LampSet {
        match self {
            Lamp::Green => LampSet::GREEN,
            Lamp::Blue => LampSet::BLUE,
            Lamp::White => LampSet::WHITE,
            Lamp::Yellow => LampSet::YELLOW,
            Lamp::Red => LampSet::RED,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// How a lamp is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LampMode {
    #[default]
    Off,
    Steady,
    Blinking,
}

/// Desired mode of every lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LampPlan {
    modes: [LampMode; 5],
}

impl LampPlan {
    /// Plan for the given controller condition.
    pub fn new(state: ControllerState, aborted: bool, tier: SafetyTier) -> Self {
        use ControllerState::*;

        let mut plan = Self::default();

        match state {
            Idle => plan.set(Lamp::Green, LampMode::Steady),
            Lockout => plan.set(Lamp::White, LampMode::Blinking),
            Verify => {
                plan.set(Lamp::Blue, LampMode::Steady);
                plan.set(Lamp::White, LampMode::Steady);
            }
            Unblank | OpenShutter | Capture | CloseShutter | Blank | Hang => {
                plan.set(Lamp::Blue, LampMode::Steady)
            }
        }
        if aborted {
            plan.set(Lamp::Blue, LampMode::Blinking);
        }

        match tier {
            SafetyTier::Normal => {}
            SafetyTier::CautionRising => plan.set(Lamp::Yellow, LampMode::Blinking),
            SafetyTier::CautionSteady => plan.set(Lamp::Yellow, LampMode::Steady),
            SafetyTier::DangerRising => plan.set(Lamp::Red, LampMode::Blinking),
            SafetyTier::Locked => plan.set(Lamp::Red, LampMode::Steady),
        }

        plan
    }

    fn set(&mut self, lamp: Lamp, mode: LampMode) {
        self.modes[lamp.index()] = mode;
    }

    /// Mode of one lamp.
    pub const fn mode(&self, lamp: Lamp) -> LampMode {
        self.modes[lamp.index()]
    }

    /// Lamps lit for the given blink phase.
    pub fn lit(&self, phase_on: bool) -> LampSet {
        Lamp::ALL
            .into_iter()
            .filter(|&lamp| match self.mode(lamp) {
                LampMode::Off => false,
                LampMode::Steady => true,
                LampMode::Blinking => phase_on,
            })
            .fold(LampSet::empty(), |set, lamp| set | lamp.flag())
    }
}

/// Blink phase tracker.
#[derive(Debug, Clone, Default)]
pub struct Indicator {
    plan: LampPlan,
    phase_on: bool,
}

impl Indicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current plan.
    pub const fn plan(&self) -> &LampPlan {
        &self.plan
    }

    /// Adopt `plan`. Returns `true` if it differs from the current one.
    ///
    /// A new plan starts with blinking lamps lit; an unchanged plan keeps
    /// its phase.
    pub fn apply(&mut self, plan: LampPlan) -> bool {
        if plan == self.plan {
            return false;
        }
        self.plan = plan;
        self.phase_on = true;
        true
    }

    /// Advance one blink half-period and return the lamps to light.
    pub fn advance(&mut self) -> LampSet {
        let lit = self.plan.lit(self.phase_on);
        self.phase_on = !self.phase_on;
        lit
    }
}
