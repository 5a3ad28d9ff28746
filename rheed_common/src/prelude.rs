//! Prelude module for common re-exports.
//!
//! ```rust
//! use rheed_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::protocol::{Direction, Message, ProtocolError};

// ─── Link ───────────────────────────────────────────────────────────
pub use crate::link::{Link, LinkError, LinkReceiver, LinkSender};
pub use crate::liveness::{LinkHealth, Liveness, LivenessWindow};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_BAUD_RATE, LIVENESS_TICK, LIVENESS_WINDOW_TICKS};
