//! Disconnect fail-safe table.
//!
//! When the link flatlines mid-cycle the controller performs exactly one
//! fail-safe actuation chosen by the state it was in, then halts until the
//! next handshake.

use crate::state::ControllerState;

/// Fail-safe actuation for a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailSafe {
    /// Nothing is energized.
    None,
    /// Beam may be on; shutter is closed.
    BlankBeam,
    /// Shutter may be open and beam may be on.
    CloseShutterAndBlank,
}

/// Fail-safe for a disconnect observed in `state`.
pub const fn failsafe_for(state: ControllerState) -> FailSafe {
    use ControllerState::*;
    match state {
        Idle | Unblank | Lockout => FailSafe::None,
        OpenShutter | Blank => FailSafe::BlankBeam,
        Capture | Verify | CloseShutter | Hang => FailSafe::CloseShutterAndBlank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ControllerState::*;

    #[test]
    fn table_matches_states() {
        assert_eq!(failsafe_for(Idle), FailSafe::None);
        assert_eq!(failsafe_for(Unblank), FailSafe::None);
        assert_eq!(failsafe_for(Lockout), FailSafe::None);
        assert_eq!(failsafe_for(OpenShutter), FailSafe::BlankBeam);
        assert_eq!(failsafe_for(Blank), FailSafe::BlankBeam);
        assert_eq!(failsafe_for(Capture), FailSafe::CloseShutterAndBlank);
        assert_eq!(failsafe_for(Verify), FailSafe::CloseShutterAndBlank);
        assert_eq!(failsafe_for(CloseShutter), FailSafe::CloseShutterAndBlank);
        assert_eq!(failsafe_for(Hang), FailSafe::CloseShutterAndBlank);
    }
}
