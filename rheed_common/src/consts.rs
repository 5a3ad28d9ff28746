//! Protocol and timing constants shared by controller and host.
//!
//! Single source of truth for the defaults both ends must agree on.

use std::time::Duration;

/// Serial baud rate used by both ends.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Liveness sampling tick.
pub const LIVENESS_TICK: Duration = Duration::from_secs(1);

/// Consecutive silent ticks before the link is declared flatlined.
///
/// Two expected 5 s heartbeats fit in the window, so one missed pulse is tolerated.
pub const LIVENESS_WINDOW_TICKS: u32 = 10;

/// Host heartbeat period.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Poll period while waiting for the handshake reply.
pub const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

/// Prefix of a submitted secret line.
pub const SECRET_PREFIX: &str = "PWD:";

static_assertions::const_assert!(
    LIVENESS_TICK.as_secs() * LIVENESS_WINDOW_TICKS as u64 >= 2 * HEARTBEAT_PERIOD.as_secs()
);
