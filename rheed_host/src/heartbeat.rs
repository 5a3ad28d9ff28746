//! Heartbeat gate.
//!
//! The heartbeat task pauses while a `READY` or a secret is in flight so a
//! `PULSE` never lands between the host's reply and the controller reading
//! it. Holds nest: the gate opens when the last [`HeartbeatHold`] drops.
//!
//! Taking a hold and sending through [`HeartbeatGate::send_if_open`] are
//! serialized, so once `hold()` returns no pulse is in flight.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct HeartbeatGate {
    holds: watch::Sender<u32>,
    send: Arc<Mutex<()>>,
}

impl Default for HeartbeatGate {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatGate {
    pub fn new() -> Self {
        let (holds, _) = watch::channel(0);
        Self {
            holds,
            send: Arc::new(Mutex::new(())),
        }
    }

    /// Suspend heartbeats until the returned guard drops.
    pub fn hold(&self) -> HeartbeatHold {
        let _send = self.send.lock();
        self.holds.send_modify(|n| *n += 1);
        trace!("Heartbeat held");
        HeartbeatHold {
            holds: self.holds.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.holds.borrow() == 0
    }

    /// Run `send` only if no hold is active; `None` when held.
    pub fn send_if_open<R>(&self, send: impl FnOnce() -> R) -> Option<R> {
        let _send = self.send.lock();
        self.is_open().then(send)
    }

    /// Wait until no hold is active.
    pub async fn wait_open(&self) {
        let mut rx = self.holds.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Active heartbeat suspension.
#[derive(Debug)]
pub struct HeartbeatHold {
    holds: watch::Sender<u32>,
}

impl Drop for HeartbeatHold {
    fn drop(&mut self) {
        self.holds.send_modify(|n| *n = n.saturating_sub(1));
        trace!("Heartbeat released");
    }
}
