//! `MARCO!` / `POLO!` connection probe.
//!
//! The host initiates; the controller accepts. Both waits are unbounded and
//! only end on success, a link error, or the caller clearing `running`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::link::{LinkError, LinkReceiver, LinkSender};
use crate::protocol::Message;

/// Interval between repeated probes while no reply has arrived.
pub const PROBE_REPEAT: Duration = Duration::from_secs(1);

/// Host side: send `MARCO!` and wait for `POLO!`.
///
/// The probe is repeated every [`PROBE_REPEAT`] so a controller that starts
/// listening late still answers.
pub fn initiate(
    sender: &LinkSender,
    receiver: &mut LinkReceiver,
    poll: Duration,
    running: &AtomicBool,
) -> Result<(), LinkError> {
    let mut last_probe: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        if last_probe.is_none_or(|t| t.elapsed() >= PROBE_REPEAT) {
            sender.send(&Message::Marco)?;
            last_probe = Some(Instant::now());
        }

        if let Some(line) = receiver.recv_line(poll)? {
            match Message::parse(&line) {
                Ok(Message::Polo) => {
                    info!("Handshake complete: controller answered POLO!");
                    return Ok(());
                }
                other => debug!("Ignoring {other:?} while waiting for POLO!"),
            }
        }
    }

    Err(LinkError::HandshakeAborted)
}

/// Controller side: wait for `MARCO!` and answer `POLO!`.
pub fn accept(
    sender: &LinkSender,
    receiver: &mut LinkReceiver,
    poll: Duration,
    running: &AtomicBool,
) -> Result<(), LinkError> {
    while running.load(Ordering::SeqCst) {
        if let Some(line) = receiver.recv_line(poll)? {
            match Message::parse(&line) {
                Ok(Message::Marco) => {
                    sender.send(&Message::Polo)?;
                    info!("Handshake complete: answered MARCO! with POLO!");
                    return Ok(());
                }
                other => debug!("Ignoring {other:?} while waiting for MARCO!"),
            }
        }
    }

    Err(LinkError::HandshakeAborted)
}
