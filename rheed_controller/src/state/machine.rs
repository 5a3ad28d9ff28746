//! Beam sequencing FSM.
//!
//! Idle → Unblank → OpenShutter → Capture → Verify → CloseShutter → Blank,
//! with Lockout entered from the exposure ratchet and Hang as the fail-safe
//! for an unknown state code.
//!
//! [`step`] is pure: it maps the current state and a guard snapshot to the
//! next state plus the actions the cycle runner must perform. Guards are
//! evaluated in priority order and the first match wins.

use rheed_common::protocol::Message;

/// Controller state. Stored as a `u8` code in the control block mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControllerState {
    /// Waiting for a start request.
    Idle = 0,
    /// Unblanking the beam.
    Unblank = 1,
    /// Opening the shutter onto the sample.
    OpenShutter = 2,
    /// Triggering the camera.
    Capture = 3,
    /// Waiting for operator image verification.
    Verify = 4,
    /// Closing the shutter.
    CloseShutter = 5,
    /// Blanking the beam.
    Blank = 6,
    /// Controls locked until the shared secret is entered.
    Lockout = 7,
    /// Unknown state code; recovered by closing the shutter.
    Hang = 0xFF,
}

impl ControllerState {
    /// Numeric state code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a state code. Anything unknown decodes to [`ControllerState::Hang`].
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::Unblank,
            2 => Self::OpenShutter,
            3 => Self::Capture,
            4 => Self::Verify,
            5 => Self::CloseShutter,
            6 => Self::Blank,
            7 => Self::Lockout,
            _ => Self::Hang,
        }
    }

    /// States in which the stop request is polled.
    #[inline]
    pub const fn polls_stop(self) -> bool {
        !matches!(self, Self::Verify)
    }
}

/// Operator verdict on the captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyOutcome {
    /// No verdict yet.
    #[default]
    Pending,
    /// Image accepted (start button).
    Accept,
    /// Retake requested (stop button).
    Retake,
}

/// Result of comparing the pending secret this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretCheck {
    /// No secret was pending.
    #[default]
    Absent,
    /// Pending secret matched.
    Match,
    /// Pending secret did not match.
    Mismatch,
}

/// Guard snapshot sampled once per FSM cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Guards {
    /// Exposure ratchet engaged.
    pub lockout: bool,
    /// Start edge seen since the last cycle.
    pub start_requested: bool,
    /// Stop edge seen since the last cycle.
    pub stop_requested: bool,
    /// Host acknowledged the captured image with `READY`.
    pub image_ready: bool,
    /// `VERIFY` has been sent for the current capture.
    pub verify_requested: bool,
    /// Operator verdict.
    pub verify_outcome: VerifyOutcome,
    /// `PASSWORD` has been sent for the current lockout.
    pub secret_requested: bool,
    /// Pending secret comparison.
    pub secret: SecretCheck,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Clear per-cycle flags (Idle).
    ResetCycle,
    /// Unblank the beam.
    BeamOn,
    /// Blank the beam.
    BeamOff,
    /// Move the shutter to the capture angle and dwell.
    OpenShutter,
    /// Pulse the camera trigger for the exposure window.
    Capture,
    /// Move the shutter to the closed angle and settle.
    CloseShutter,
    /// Mark `VERIFY` as sent and discard stale verdicts.
    RequestVerification,
    /// Mark `PASSWORD` as sent.
    RequestSecret,
    /// Clear the lockout flag.
    Unlock,
    /// Record an operator abort (blue lamp blinks until Idle).
    Abort,
    /// Send a message to the host.
    Emit(Message),
}

/// Upper bound on actions per transition.
pub const MAX_ACTIONS: usize = 4;

/// Fixed-capacity action list.
pub type ActionList = heapless::Vec<Action, MAX_ACTIONS>;

/// Outcome of one FSM step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State for the next cycle.
    pub next: ControllerState,
    /// Actions to perform, in order, before entering `next`.
    pub actions: ActionList,
}

fn to(next: ControllerState, actions: &[Action]) -> Transition {
    let mut list = ActionList::new();
    for action in actions {
        if list.push(action.clone()).is_err() {
            debug_assert!(false, "more than {MAX_ACTIONS} actions for {next:?}");
            break;
        }
    }
    Transition {
        next,
        actions: list,
    }
}

/// Compute the next state and actions for one cycle.
pub fn step(state: ControllerState, g: &Guards) -> Transition {
    use Action::*;
    use ControllerState as S;

    match state {
        S::Idle => {
            if g.lockout {
                to(S::Lockout, &[ResetCycle, Emit(Message::Critical)])
            } else if g.start_requested {
                to(S::Unblank, &[ResetCycle])
            } else {
                to(S::Idle, &[ResetCycle])
            }
        }

        S::Unblank => {
            if g.lockout {
                to(S::Lockout, &[Emit(Message::Critical)])
            } else if g.stop_requested {
                to(S::Idle, &[Abort, Emit(Message::Stop)])
            } else {
                to(S::OpenShutter, &[BeamOn, Emit(Message::BeamOn)])
            }
        }

        S::OpenShutter => {
            if g.lockout {
                to(S::Blank, &[Emit(Message::Critical)])
            } else if g.stop_requested {
                to(S::Blank, &[Abort, Emit(Message::Stop)])
            } else {
                to(S::Capture, &[OpenShutter])
            }
        }

        S::Capture => {
            if g.lockout {
                to(S::CloseShutter, &[Emit(Message::Critical)])
            } else if g.stop_requested {
                to(S::CloseShutter, &[Abort, Emit(Message::Stop)])
            } else {
                to(S::Verify, &[Capture])
            }
        }

        // Stop is not polled here; the stop button means Retake.
        S::Verify => {
            if g.lockout {
                to(S::CloseShutter, &[Emit(Message::Critical)])
            } else if !g.verify_requested {
                if g.image_ready {
                    to(S::Verify, &[RequestVerification, Emit(Message::Verify)])
                } else {
                    to(S::Verify, &[])
                }
            } else {
                match g.verify_outcome {
                    VerifyOutcome::Accept => to(S::CloseShutter, &[Emit(Message::Proceed)]),
                    VerifyOutcome::Retake => to(S::Capture, &[Emit(Message::Redo)]),
                    VerifyOutcome::Pending => to(S::Verify, &[]),
                }
            }
        }

        S::CloseShutter => to(S::Blank, &[CloseShutter]),

        S::Blank => {
            if g.lockout {
                to(S::Lockout, &[BeamOff, Emit(Message::BeamOff)])
            } else {
                to(S::Idle, &[BeamOff, Emit(Message::BeamOff)])
            }
        }

        S::Lockout => {
            if !g.secret_requested {
                to(S::Lockout, &[RequestSecret, Emit(Message::Password)])
            } else {
                match g.secret {
                    SecretCheck::Match => to(S::Idle, &[Unlock]),
                    SecretCheck::Mismatch => to(S::Lockout, &[Emit(Message::Incorrect)]),
                    SecretCheck::Absent => to(S::Lockout, &[]),
                }
            }
        }

        S::Hang => to(S::CloseShutter, &[Emit(Message::Hang)]),
    }
}

/// State entered after an action of `state` failed.
///
/// A failed shutter close moves on to `Blank`, so a jammed shutter cannot
/// keep the beam on by cycling through `Hang`.
pub const fn after_fault(state: ControllerState) -> ControllerState {
    match state {
        ControllerState::CloseShutter => ControllerState::Blank,
        _ => ControllerState::Hang,
    }
}
