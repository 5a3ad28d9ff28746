//! Flatline detection.
//!
//! Every received line marks traffic on the shared [`LinkHealth`]. A monitor
//! samples and clears that mark once per tick and feeds it to a
//! [`LivenessWindow`]; a full window of silent ticks flips the link to
//! flatline. Every session loop on either side stops when it observes the
//! flatline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one liveness sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Traffic seen within the window.
    Alive,
    /// No traffic for the whole window.
    Flatline,
}

/// Counts consecutive silent ticks.
#[derive(Debug, Clone)]
pub struct LivenessWindow {
    window_ticks: u32,
    silent_ticks: u32,
}

impl LivenessWindow {
    /// Create a window that tolerates `window_ticks - 1` silent ticks.
    pub const fn new(window_ticks: u32) -> Self {
        Self {
            window_ticks,
            silent_ticks: 0,
        }
    }

    /// Consecutive silent ticks so far.
    #[inline]
    pub const fn silent_ticks(&self) -> u32 {
        self.silent_ticks
    }

    /// Feed one tick; `traffic` is whether anything arrived since the last one.
    pub fn tick(&mut self, traffic: bool) -> Liveness {
        if traffic {
            self.silent_ticks = 0;
            return Liveness::Alive;
        }

        self.silent_ticks = self.silent_ticks.saturating_add(1);
        if self.silent_ticks >= self.window_ticks {
            Liveness::Flatline
        } else {
            Liveness::Alive
        }
    }

    /// Forget accumulated silence.
    pub fn reset(&mut self) {
        self.silent_ticks = 0;
    }
}

#[derive(Debug)]
struct HealthInner {
    traffic: AtomicBool,
    flatline: AtomicBool,
}

/// Shared connection liveness, cloned into every task of a session.
///
/// `flatline == true` means disconnected. A fresh handle starts flatlined
/// until a handshake marks it live.
#[derive(Debug, Clone)]
pub struct LinkHealth {
    inner: Arc<HealthInner>,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkHealth {
    /// New handle in the disconnected state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HealthInner {
                traffic: AtomicBool::new(false),
                flatline: AtomicBool::new(true),
            }),
        }
    }

    /// Mark the link live after a successful handshake.
    pub fn mark_live(&self) {
        self.inner.traffic.store(true, Ordering::SeqCst);
        self.inner.flatline.store(false, Ordering::SeqCst);
    }

    /// Record that a line arrived.
    #[inline]
    pub fn record_traffic(&self) {
        self.inner.traffic.store(true, Ordering::SeqCst);
    }

    /// Read and clear the traffic mark.
    #[inline]
    pub fn take_traffic(&self) -> bool {
        self.inner.traffic.swap(false, Ordering::SeqCst)
    }

    /// Whether the link is considered disconnected.
    #[inline]
    pub fn is_flatline(&self) -> bool {
        self.inner.flatline.load(Ordering::SeqCst)
    }

    /// Force the disconnected state.
    pub fn set_flatline(&self) {
        self.inner.flatline.store(true, Ordering::SeqCst);
    }
}

/// Blocking liveness monitor for thread-based sessions.
///
/// Returns when the link flatlines (after calling `on_flatline`), when some
/// other task already flatlined it, or when `running` is cleared.
pub fn run_monitor(
    health: &LinkHealth,
    tick: Duration,
    window_ticks: u32,
    running: &AtomicBool,
    on_flatline: impl FnOnce(),
) {
    let mut window = LivenessWindow::new(window_ticks);

    loop {
        thread::sleep(tick);
        if !running.load(Ordering::SeqCst) || health.is_flatline() {
            return;
        }

        match window.tick(health.take_traffic()) {
            Liveness::Alive => {
                if window.silent_ticks() > 0 {
                    debug!(silent = window.silent_ticks(), "No traffic this tick");
                }
            }
            Liveness::Flatline => {
                warn!(
                    "No traffic for {} ticks, link flatlined",
                    window.silent_ticks()
                );
                health.set_flatline();
                on_flatline();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_flatlines_after_full_silence() {
        let mut w = LivenessWindow::new(10);
        for _ in 0..9 {
            assert_eq!(w.tick(false), Liveness::Alive);
        }
        assert_eq!(w.tick(false), Liveness::Flatline);
    }

    #[test]
    fn traffic_resets_silence() {
        let mut w = LivenessWindow::new(3);
        w.tick(false);
        w.tick(false);
        assert_eq!(w.tick(true), Liveness::Alive);
        assert_eq!(w.silent_ticks(), 0);
        assert_eq!(w.tick(false), Liveness::Alive);
    }

    #[test]
    fn one_missed_heartbeat_is_tolerated() {
        // Heartbeats every 5 ticks, one of them lost: 9 silent ticks max.
        let mut w = LivenessWindow::new(10);
        let pattern = (1..=20).map(|t| t % 5 == 0 && t != 10);
        for traffic in pattern {
            assert_eq!(w.tick(traffic), Liveness::Alive);
        }
    }

    #[test]
    fn health_starts_flatlined() {
        let h = LinkHealth::new();
        assert!(h.is_flatline());
        h.mark_live();
        assert!(!h.is_flatline());
        assert!(h.take_traffic());
        assert!(!h.take_traffic());
    }

    #[test]
    fn monitor_flatlines_silent_link() {
        let h = LinkHealth::new();
        h.mark_live();
        let running = AtomicBool::new(true);
        let fired = AtomicBool::new(false);
        run_monitor(&h, Duration::from_millis(1), 3, &running, || {
            fired.store(true, Ordering::SeqCst)
        });
        assert!(h.is_flatline());
        assert!(fired.load(Ordering::SeqCst));
    }
}
