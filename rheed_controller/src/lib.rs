//! # RHEED Beam Controller Library
//!
//! Safety interlock for an electron-beam exposure apparatus. Sequences beam
//! unblanking, the sample shutter and the camera, waits for operator image
//! verification, and enforces a cumulative beam-on limit that locks the
//! controls until the shared secret is entered.
//!
//! ## Layers
//!
//! 1. **Safety** — exposure timer, tier thresholds, lockout gate, fail-safe table
//! 2. **State** — pure beam FSM `(state, guards) -> (state, actions)`
//! 3. **Control** — shared control block and its wake-up signal
//! 4. **Cycle** — FSM runner performing actions against the driver
//! 5. **Session** — per-connection task supervisor
//!
//! Hardware is reached only through [`driver::ActuatorDriver`] and
//! [`driver::OperatorPanel`]; [`driver::simulation`] provides both in
//! software.

pub mod config;
pub mod control;
pub mod cycle;
pub mod driver;
pub mod error;
pub mod indicator;
pub mod safety;
pub mod session;
pub mod state;

pub use config::ControllerConfig;
pub use cycle::SessionEnd;
pub use error::ControllerError;
pub use session::Controller;
