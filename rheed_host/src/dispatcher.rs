//! Host-side protocol dispatcher.
//!
//! [`HostState::dispatch`] classifies one inbound message and returns what
//! the session should do about it. It never blocks and never talks to the
//! link itself. `CRITICAL` and `HANG` are narrated only; the host does not
//! second-guess the controller's ratchet.

use rheed_common::protocol::{Direction, Message};
use std::fmt;
use tracing::debug;

use crate::classifier::Label;

/// Tri-state "should classify" flag shared with the display loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifyGate {
    /// No verdict for the displayed image yet.
    #[default]
    Pending,
    /// Operator accepted the image; classify it.
    Classify,
    /// Operator asked for a retake; wait for the next image.
    Retake,
}

/// Operator-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected { port: String },
    Disconnected,
    BeamOn { elapsed: u32 },
    BeamOff { elapsed: u32 },
    VerifyRequested,
    Proceeding,
    Retaking,
    Critical { elapsed: u32 },
    Hang,
    Stopped,
    ImageShown { name: String },
    Classified(Label),
    ClassifyFailed(String),
    SecretSent,
}

/// Elapsed time as minutes and seconds, e.g. `9 min 30 s`.
pub fn format_elapsed(seconds: u32) -> String {
    format!("{} min {:02} s", seconds / 60, seconds % 60)
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Connected { port } => write!(f, "Connected to {port}"),
            Notice::Disconnected => write!(f, "Controller connection lost, reconnecting..."),
            Notice::BeamOn { elapsed } => write!(
                f,
                "Beam ON. Accumulated beam time: {}",
                format_elapsed(*elapsed)
            ),
            Notice::BeamOff { elapsed } => write!(
                f,
                "Beam OFF. Accumulated beam time: {}",
                format_elapsed(*elapsed)
            ),
            Notice::VerifyRequested => write!(
                f,
                "Verify the displayed image: press GREEN to accept or RED to retake"
            ),
            Notice::Proceeding => write!(f, "Image accepted, proceeding"),
            Notice::Retaking => write!(f, "Image rejected, retaking"),
            Notice::Critical { elapsed } => write!(
                f,
                "CRITICAL: beam time limit reached ({}). Controls are locked",
                format_elapsed(*elapsed)
            ),
            Notice::Hang => write!(
                f,
                "WARNING: controller recovered from an unexpected state; shutter closing"
            ),
            Notice::Stopped => write!(f, "Process stopped"),
            Notice::ImageShown { name } => write!(f, "Displaying {name}"),
            Notice::Classified(label) => write!(f, "Prediction: {label}"),
            Notice::ClassifyFailed(reason) => write!(f, "Classification failed: {reason}"),
            Notice::SecretSent => write!(f, "Password sent, waiting for the controller"),
        }
    }
}

/// What the session must do after a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing beyond bookkeeping.
    None,
    /// Show a notice to the operator.
    Narrate(Notice),
    /// Ask the operator for the lockout secret.
    PromptSecret { retry: bool },
}

/// Host-local view of the controller.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    exposure: u32,
    gate: ClassifyGate,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last reported exposure [s].
    pub const fn exposure(&self) -> u32 {
        self.exposure
    }

    pub const fn gate(&self) -> ClassifyGate {
        self.gate
    }

    /// Read and reset the classify gate.
    pub fn take_gate(&mut self) -> ClassifyGate {
        std::mem::take(&mut self.gate)
    }

    /// Apply one inbound message.
    pub fn dispatch(&mut self, message: &Message) -> Reaction {
        if message.direction() == Direction::HostToController {
            debug!("Ignoring host-bound {message:?} received from controller");
            return Reaction::None;
        }

        match message {
            Message::Exposure(seconds) => {
                self.exposure = *seconds;
                Reaction::None
            }
            Message::BeamOn => Reaction::Narrate(Notice::BeamOn {
                elapsed: self.exposure,
            }),
            Message::BeamOff => Reaction::Narrate(Notice::BeamOff {
                elapsed: self.exposure,
            }),
            Message::Verify => Reaction::Narrate(Notice::VerifyRequested),
            Message::Proceed => {
                self.gate = ClassifyGate::Classify;
                Reaction::Narrate(Notice::Proceeding)
            }
            Message::Redo => {
                self.gate = ClassifyGate::Retake;
                Reaction::Narrate(Notice::Retaking)
            }
            Message::Password => Reaction::PromptSecret { retry: false },
            Message::Incorrect => Reaction::PromptSecret { retry: true },
            Message::Critical => Reaction::Narrate(Notice::Critical {
                elapsed: self.exposure,
            }),
            Message::Hang => Reaction::Narrate(Notice::Hang),
            Message::Stop => Reaction::Narrate(Notice::Stopped),
            Message::Polo => {
                debug!("Late POLO! ignored");
                Reaction::None
            }
            Message::Marco | Message::Pulse | Message::Ready | Message::Secret(_) => {
                Reaction::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_is_shown_in_minutes_and_seconds() {
        assert_eq!(format_elapsed(0), "0 min 00 s");
        assert_eq!(format_elapsed(570), "9 min 30 s");
        assert_eq!(format_elapsed(61), "1 min 01 s");
    }

    #[test]
    fn beam_notices_carry_last_exposure() {
        let mut host = HostState::new();
        assert_eq!(host.dispatch(&Message::Exposure(125)), Reaction::None);
        assert_eq!(host.exposure(), 125);
        assert_eq!(
            host.dispatch(&Message::BeamOff),
            Reaction::Narrate(Notice::BeamOff { elapsed: 125 })
        );
        let shown = Notice::BeamOn { elapsed: 125 }.to_string();
        assert!(shown.contains("2 min 05 s"));
    }

    #[test]
    fn verdicts_drive_the_classify_gate() {
        let mut host = HostState::new();
        assert_eq!(host.gate(), ClassifyGate::Pending);
        host.dispatch(&Message::Proceed);
        assert_eq!(host.take_gate(), ClassifyGate::Classify);
        assert_eq!(host.gate(), ClassifyGate::Pending);
        host.dispatch(&Message::Redo);
        assert_eq!(host.take_gate(), ClassifyGate::Retake);
    }

    #[test]
    fn lockout_messages_prompt_for_secret() {
        let mut host = HostState::new();
        assert_eq!(
            host.dispatch(&Message::Password),
            Reaction::PromptSecret { retry: false }
        );
        assert_eq!(
            host.dispatch(&Message::Incorrect),
            Reaction::PromptSecret { retry: true }
        );
    }

    #[test]
    fn critical_and_hang_are_informational() {
        let mut host = HostState::new();
        host.dispatch(&Message::Exposure(570));
        assert_eq!(
            host.dispatch(&Message::Critical),
            Reaction::Narrate(Notice::Critical { elapsed: 570 })
        );
        assert_eq!(host.dispatch(&Message::Hang), Reaction::Narrate(Notice::Hang));
        assert_eq!(host.gate(), ClassifyGate::Pending);
    }

    #[test]
    fn host_bound_messages_are_ignored() {
        let mut host = HostState::new();
        for msg in [
            Message::Marco,
            Message::Pulse,
            Message::Ready,
            Message::Secret("x".into()),
        ] {
            assert_eq!(host.dispatch(&msg), Reaction::None);
        }
    }
}
