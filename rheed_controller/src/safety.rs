//! Safety module root.
//!
//! Cumulative exposure timer, tier thresholds with the lockout ratchet,
//! the secret-gated lockout, and the disconnect fail-safe table.

pub mod exposure;
pub mod failsafe;
pub mod lockout;
pub mod threshold;
