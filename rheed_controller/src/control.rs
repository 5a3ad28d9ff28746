//! Shared control block.
//!
//! All mutable controller state shared between session tasks lives in one
//! [`ControlBlock`] behind a single lock. Tasks never hold the lock across
//! a sleep or an actuation.
//!
//! External events (buttons, host messages, lockout engagement, flatline)
//! go through [`SharedControl::update`], which bumps a generation counter
//! and wakes the FSM runner. The runner's own bookkeeping goes through
//! [`SharedControl::apply`], which does not.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::safety::lockout::LockoutGate;
use crate::safety::threshold::{SafetyTier, ThresholdMonitor, TierEvaluation, TierThresholds};
use crate::safety::exposure::ExposureTimer;
use crate::state::{ControllerState, Guards, SecretCheck, VerifyOutcome};

/// Controller state shared by the session tasks.
#[derive(Debug, Clone)]
pub struct ControlBlock {
    /// Current FSM state. Written only by the runner.
    pub state: ControllerState,
    /// Beam unblanked.
    pub beam_on: bool,
    pub exposure: ExposureTimer,
    pub monitor: ThresholdMonitor,
    /// Safety ratchet. Set by the exposure tick, cleared only by unlock.
    pub lockout: bool,
    pub start_requested: bool,
    pub stop_requested: bool,
    pub image_ready: bool,
    pub verify_requested: bool,
    pub verify_outcome: VerifyOutcome,
    pub secret_requested: bool,
    pub pending_secret: Option<String>,
    /// Operator aborted the current run.
    pub aborted: bool,
}

impl ControlBlock {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self {
            state: ControllerState::Idle,
            beam_on: false,
            exposure: ExposureTimer::new(),
            monitor: ThresholdMonitor::new(thresholds),
            lockout: false,
            start_requested: false,
            stop_requested: false,
            image_ready: false,
            verify_requested: false,
            verify_outcome: VerifyOutcome::Pending,
            secret_requested: false,
            pending_secret: None,
            aborted: false,
        }
    }

    /// Current tier.
    #[inline]
    pub fn tier(&self) -> SafetyTier {
        self.monitor.tier()
    }

    /// Sample guards for one FSM cycle, consuming operator edges.
    ///
    /// The pending secret is only taken and compared while waiting for it
    /// in `Lockout`.
    pub fn sample_guards(&mut self, gate: &mut LockoutGate) -> Guards {
        let secret = if self.state == ControllerState::Lockout && self.secret_requested {
            match self.pending_secret.take() {
                Some(attempt) => gate.check(&attempt),
                None => SecretCheck::Absent,
            }
        } else {
            SecretCheck::Absent
        };

        Guards {
            lockout: self.lockout,
            start_requested: std::mem::take(&mut self.start_requested),
            stop_requested: std::mem::take(&mut self.stop_requested),
            image_ready: self.image_ready,
            verify_requested: self.verify_requested,
            verify_outcome: self.verify_outcome,
            secret_requested: self.secret_requested,
            secret,
        }
    }

    /// Per-run flags cleared in `Idle`.
    pub fn reset_cycle(&mut self) {
        self.image_ready = false;
        self.verify_requested = false;
        self.verify_outcome = VerifyOutcome::Pending;
        self.secret_requested = false;
        self.pending_secret = None;
        self.aborted = false;
    }

    /// Forget the previous capture before taking a new one.
    pub fn reset_verification(&mut self) {
        self.image_ready = false;
        self.verify_requested = false;
        self.verify_outcome = VerifyOutcome::Pending;
    }

    /// `VERIFY` sent: discard verdicts given before the request.
    pub fn begin_verification(&mut self) {
        self.verify_requested = true;
        self.verify_outcome = VerifyOutcome::Pending;
    }

    /// `PASSWORD` sent: discard secrets submitted before the request.
    pub fn begin_secret_request(&mut self) {
        self.secret_requested = true;
        self.pending_secret = None;
    }

    /// Secret accepted.
    pub fn unlock(&mut self) {
        self.lockout = false;
        self.secret_requested = false;
        self.pending_secret = None;
    }

    /// Start button edge.
    pub fn press_start(&mut self) {
        match self.state {
            ControllerState::Idle => self.start_requested = true,
            ControllerState::Verify if self.verify_requested => {
                self.verify_outcome = VerifyOutcome::Accept
            }
            other => debug!(state = ?other, "Start ignored"),
        }
    }

    /// Stop button edge. In `Verify` it asks for a retake instead.
    pub fn press_stop(&mut self) {
        if self.state == ControllerState::Verify {
            if self.verify_requested {
                self.verify_outcome = VerifyOutcome::Retake;
            }
        } else {
            self.request_stop();
        }
    }

    /// Stop request from any source. Not honoured in `Verify`.
    pub fn request_stop(&mut self) {
        if self.state.polls_stop() {
            self.stop_requested = true;
        } else {
            debug!("Stop ignored during Verify");
        }
    }

    /// Host acknowledged the captured image.
    pub fn mark_image_ready(&mut self) {
        match self.state {
            ControllerState::Capture | ControllerState::Verify => self.image_ready = true,
            other => debug!(state = ?other, "READY ignored"),
        }
    }

    /// Store a secret attempt for the next comparison.
    pub fn submit_secret(&mut self, attempt: String) {
        if self.state == ControllerState::Lockout {
            self.pending_secret = Some(attempt);
        } else {
            debug!(state = ?self.state, "Secret ignored outside Lockout");
        }
    }

    /// One exposure tick: advance the timer and re-evaluate the tier.
    ///
    /// Sets the lockout flag when the monitor asks for it; never clears it.
    pub fn tick_exposure(&mut self) -> (u32, TierEvaluation) {
        let seconds = self.exposure.tick(self.beam_on);
        let eval = self.monitor.evaluate(seconds);
        if eval.engage_lockout {
            self.lockout = true;
        }
        (seconds, eval)
    }

    /// Return to `Idle` after a disconnect.
    ///
    /// Exposure, tier and the lockout flag are kept. `beam_on` follows the
    /// actuator and is left to the caller.
    pub fn halt(&mut self) {
        self.state = ControllerState::Idle;
        self.start_requested = false;
        self.stop_requested = false;
        self.reset_cycle();
    }
}

#[derive(Debug)]
struct Slot {
    block: ControlBlock,
    generation: u64,
}

/// Cloneable handle to the control block.
#[derive(Debug, Clone)]
pub struct SharedControl {
    inner: Arc<(Mutex<Slot>, Condvar)>,
}

impl SharedControl {
    pub fn new(block: ControlBlock) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Slot {
                    block,
                    generation: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Mutate on behalf of an external event and wake waiters.
    pub fn update<R>(&self, f: impl FnOnce(&mut ControlBlock) -> R) -> R {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock();
        let out = f(&mut slot.block);
        slot.generation = slot.generation.wrapping_add(1);
        cvar.notify_all();
        out
    }

    /// Mutate without waking waiters. Returns the current generation.
    pub fn apply<R>(&self, f: impl FnOnce(&mut ControlBlock) -> R) -> (R, u64) {
        let mut slot = self.inner.0.lock();
        let out = f(&mut slot.block);
        (out, slot.generation)
    }

    /// Read a value out of the block.
    pub fn read<R>(&self, f: impl FnOnce(&ControlBlock) -> R) -> R {
        f(&self.inner.0.lock().block)
    }

    /// Copy of the whole block.
    pub fn snapshot(&self) -> ControlBlock {
        self.read(ControlBlock::clone)
    }

    pub fn generation(&self) -> u64 {
        self.inner.0.lock().generation
    }

    /// Wake waiters without changing anything.
    pub fn notify(&self) {
        self.update(|_| ());
    }

    /// Block until the generation moves past `since` or `timeout` elapses.
    /// Returns the generation observed on wake-up.
    pub fn wait_for_change(&self, since: u64, timeout: Duration) -> u64 {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut slot = lock.lock();
        while slot.generation == since {
            if cvar.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn block() -> ControlBlock {
        ControlBlock::new(TierThresholds::DEFAULT)
    }

    #[test]
    fn start_only_counts_in_idle() {
        let mut cb = block();
        cb.press_start();
        assert!(cb.start_requested);

        let mut cb = block();
        cb.state = ControllerState::Capture;
        cb.press_start();
        assert!(!cb.start_requested);
    }

    #[test]
    fn buttons_in_verify_give_verdicts_after_request() {
        let mut cb = block();
        cb.state = ControllerState::Verify;
        cb.press_start();
        assert_eq!(cb.verify_outcome, VerifyOutcome::Pending);

        cb.begin_verification();
        cb.press_stop();
        assert_eq!(cb.verify_outcome, VerifyOutcome::Retake);
        assert!(!cb.stop_requested);
        cb.press_start();
        assert_eq!(cb.verify_outcome, VerifyOutcome::Accept);
    }

    #[test]
    fn stop_request_is_ignored_in_verify() {
        let mut cb = block();
        cb.state = ControllerState::Verify;
        cb.request_stop();
        assert!(!cb.stop_requested);
        cb.state = ControllerState::OpenShutter;
        cb.request_stop();
        assert!(cb.stop_requested);
    }

    #[test]
    fn guards_consume_edges() {
        let mut cb = block();
        let mut gate = LockoutGate::new("s");
        cb.press_start();
        assert!(cb.sample_guards(&mut gate).start_requested);
        assert!(!cb.sample_guards(&mut gate).start_requested);
    }

    #[test]
    fn secret_compared_only_when_requested() {
        let mut gate = LockoutGate::new("open");
        let mut cb = block();
        cb.state = ControllerState::Lockout;
        cb.lockout = true;
        cb.submit_secret("open".to_string());
        // Not yet requested: left pending.
        assert_eq!(cb.sample_guards(&mut gate).secret, SecretCheck::Absent);

        cb.begin_secret_request();
        assert!(cb.pending_secret.is_none());
        cb.submit_secret("shut".to_string());
        assert_eq!(cb.sample_guards(&mut gate).secret, SecretCheck::Mismatch);
        assert!(cb.pending_secret.is_none());
        assert_eq!(cb.sample_guards(&mut gate).secret, SecretCheck::Absent);
        cb.submit_secret("open".to_string());
        assert_eq!(cb.sample_guards(&mut gate).secret, SecretCheck::Match);
    }

    #[test]
    fn lockout_survives_draining_and_halt() {
        let mut cb = block();
        cb.exposure = ExposureTimer::with_seconds(569);
        cb.beam_on = true;
        let (seconds, eval) = cb.tick_exposure();
        assert_eq!(seconds, 570);
        assert!(eval.engage_lockout);
        assert!(cb.lockout);

        cb.beam_on = false;
        for _ in 0..600 {
            cb.tick_exposure();
        }
        assert_eq!(cb.exposure.seconds(), 0);
        assert!(cb.lockout);

        cb.state = ControllerState::Lockout;
        cb.halt();
        assert!(cb.lockout);
        assert_eq!(cb.state, ControllerState::Idle);

        cb.unlock();
        assert!(!cb.lockout);
    }

    proptest::proptest! {
        #[test]
        fn ratchet_holds_for_any_beam_pattern(
            pattern in proptest::collection::vec(proptest::bool::ANY, 1..400),
        ) {
            let mut cb = block();
            cb.exposure = ExposureTimer::with_seconds(569);
            cb.beam_on = true;
            cb.tick_exposure();
            proptest::prop_assert!(cb.lockout);
            for beam_on in pattern {
                cb.beam_on = beam_on;
                cb.tick_exposure();
                proptest::prop_assert!(cb.lockout);
            }
        }
    }

    #[test]
    fn update_wakes_waiter() {
        let shared = SharedControl::new(block());
        let since = shared.generation();
        let s = shared.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            s.update(|cb| cb.press_start());
        });
        let seen = shared.wait_for_change(since, Duration::from_secs(5));
        assert_ne!(seen, since);
        assert!(shared.read(|cb| cb.start_requested));
        waker.join().unwrap();
    }

    #[test]
    fn apply_does_not_wake() {
        let shared = SharedControl::new(block());
        let since = shared.generation();
        let (_, generation) = shared.apply(|cb| cb.reset_cycle());
        assert_eq!(generation, since);
        assert_eq!(shared.wait_for_change(since, Duration::from_millis(10)), since);
    }
}
