//! FSM cycle runner: sample → step → act.
//!
//! Each cycle samples a guard snapshot from the control block, asks the
//! pure [`step`] function for the transition and performs its actions in
//! order. Physical dwell times are held inside the action that needs them,
//! so cancellation is only honoured between states.
//!
//! When the runner has nothing to do (the state did not change) it blocks
//! on the control block's condition variable until an external event or the
//! cycle period elapses.
//!
//! ## Faults
//! A failed action blanks the beam on its own before the FSM moves to the
//! state given by [`after_fault`].
//!
//! ## Disconnect
//! On flatline or shutdown the runner performs exactly one fail-safe
//! actuation chosen by [`failsafe_for`], resets transient flags and returns.

use rheed_common::link::LinkSender;
use rheed_common::liveness::LinkHealth;
use rheed_common::protocol::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::config::{ShutterConfig, TimingConfig};
use crate::control::SharedControl;
use crate::driver::{DriverError, SharedDriver};
use crate::safety::failsafe::{FailSafe, failsafe_for};
use crate::safety::lockout::LockoutGate;
use crate::state::{Action, ControllerState, after_fault, step};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The link went silent; `failsafe` was applied for `state`.
    Flatline {
        state: ControllerState,
        failsafe: FailSafe,
    },
    /// The process is stopping; `failsafe` was applied for `state`.
    Shutdown {
        state: ControllerState,
        failsafe: FailSafe,
    },
}

/// Runner counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// FSM cycles executed.
    pub cycles: u64,
    /// Cycles whose next state differed from the current one.
    pub transitions: u64,
    /// Actions that failed with a driver error.
    pub faults: u64,
}

/// Drives the beam FSM against a control block and an actuator.
pub struct CycleRunner {
    shared: SharedControl,
    driver: SharedDriver,
    gate: LockoutGate,
    timing: TimingConfig,
    open_duty: u16,
    closed_duty: u16,
    stats: RunnerStats,
}

impl CycleRunner {
    pub fn new(
        shared: SharedControl,
        driver: SharedDriver,
        gate: LockoutGate,
        timing: TimingConfig,
        shutter: &ShutterConfig,
    ) -> Self {
        Self {
            shared,
            driver,
            gate,
            timing,
            open_duty: shutter.open_duty(),
            closed_duty: shutter.closed_duty(),
            stats: RunnerStats::default(),
        }
    }

    pub const fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    /// Run cycles until the link flatlines or `running` is cleared.
    pub fn run(
        &mut self,
        sender: &LinkSender,
        health: &LinkHealth,
        running: &AtomicBool,
    ) -> SessionEnd {
        loop {
            if !running.load(Ordering::SeqCst) {
                let (state, failsafe) = self.fail_safe(sender);
                return SessionEnd::Shutdown { state, failsafe };
            }
            if health.is_flatline() {
                let (state, failsafe) = self.fail_safe(sender);
                return SessionEnd::Flatline { state, failsafe };
            }

            let gate = &mut self.gate;
            let ((state, guards), since) = self
                .shared
                .apply(|cb| (cb.state, cb.sample_guards(gate)));

            let transition = step(state, &guards);
            let (next, faulted) = match self.perform(&transition.actions, sender, health) {
                Ok(()) => (transition.next, false),
                Err(e) => {
                    let next = after_fault(state);
                    warn!(?state, ?next, "Actuation failed: {e}");
                    self.stats.faults += 1;
                    self.blank_after_fault();
                    (next, true)
                }
            };

            self.shared.apply(|cb| cb.state = next);
            self.stats.cycles += 1;

            if next != state {
                self.stats.transitions += 1;
                info!(from = ?state, to = ?next, "State transition");
            }
            if next == state || faulted {
                self.shared.wait_for_change(since, self.timing.cycle);
            }
        }
    }

    fn perform(
        &mut self,
        actions: &[Action],
        sender: &LinkSender,
        health: &LinkHealth,
    ) -> Result<(), DriverError> {
        for action in actions {
            match action {
                Action::ResetCycle => {
                    self.shared.apply(|cb| cb.reset_cycle());
                }
                Action::BeamOn => {
                    self.driver.lock().set_beam(true)?;
                    self.shared.apply(|cb| cb.beam_on = true);
                    info!("Beam unblanked");
                }
                Action::BeamOff => {
                    self.driver.lock().set_beam(false)?;
                    self.shared.apply(|cb| cb.beam_on = false);
                    info!("Beam blanked");
                }
                Action::OpenShutter => {
                    self.driver.lock().set_shutter_duty(self.open_duty)?;
                    debug!(duty = self.open_duty, "Shutter open, dwelling");
                    thread::sleep(self.timing.shutter_dwell);
                }
                Action::Capture => {
                    self.shared.apply(|cb| cb.reset_verification());
                    self.driver.lock().set_camera_trigger(true)?;
                    thread::sleep(self.timing.capture_window);
                    self.driver.lock().set_camera_trigger(false)?;
                    debug!("Capture complete");
                }
                Action::CloseShutter => {
                    self.driver.lock().set_shutter_duty(self.closed_duty)?;
                    thread::sleep(self.timing.shutter_settle);
                    debug!(duty = self.closed_duty, "Shutter closed");
                }
                Action::RequestVerification => {
                    self.shared.apply(|cb| cb.begin_verification());
                    info!("Image ready, awaiting operator verification");
                }
                Action::RequestSecret => {
                    self.shared.apply(|cb| cb.begin_secret_request());
                    warn!("Controls locked, secret requested");
                }
                Action::Unlock => {
                    self.shared.apply(|cb| cb.unlock());
                    info!("Lockout released");
                }
                Action::Abort => {
                    self.shared.apply(|cb| cb.aborted = true);
                    info!("Run aborted by operator");
                }
                Action::Emit(message) => emit(sender, health, message),
            }
        }
        Ok(())
    }

    /// Blank the beam after a failed action, independent of the shutter.
    fn blank_after_fault(&mut self) {
        let blanked = self.driver.lock().set_beam(false);
        match blanked {
            Ok(()) => {
                self.shared.apply(|cb| cb.beam_on = false);
                info!("Beam blanked after actuation fault");
            }
            Err(e) => error!("Beam blank after fault failed: {e}"),
        }
    }

    /// Apply the disconnect fail-safe once and reset to `Idle`.
    ///
    /// Shutter and beam are driven independently; `beam_on` is cleared only
    /// when the blank succeeded.
    fn fail_safe(&mut self, sender: &LinkSender) -> (ControllerState, FailSafe) {
        let (state, beam_on) = self.shared.read(|cb| (cb.state, cb.beam_on));
        let failsafe = failsafe_for(state);
        let close = failsafe == FailSafe::CloseShutterAndBlank;
        let blank = failsafe != FailSafe::None || beam_on;

        let (closed, blanked) = {
            let mut driver = self.driver.lock();
            let closed = if close {
                driver.set_shutter_duty(self.closed_duty)
            } else {
                Ok(())
            };
            let blanked = if blank { driver.set_beam(false) } else { Ok(()) };
            (closed, blanked)
        };
        if let Err(e) = &closed {
            error!(?state, ?failsafe, "Fail-safe shutter close failed: {e}");
        }
        let still_on = match blanked {
            Ok(()) => false,
            Err(e) => {
                error!(?state, ?failsafe, "Fail-safe beam blank failed: {e}");
                beam_on
            }
        };
        if closed.is_ok() && !still_on {
            warn!(?state, ?failsafe, "Fail-safe applied");
        }

        if beam_on && !still_on {
            // Best effort; the peer is probably gone.
            if let Err(e) = sender.send(&Message::BeamOff) {
                debug!("BEAM_OFF not delivered: {e}");
            }
        }

        self.shared.update(|cb| {
            cb.halt();
            cb.beam_on = still_on;
        });
        (state, failsafe)
    }
}

fn emit(sender: &LinkSender, health: &LinkHealth, message: &Message) {
    if let Err(e) = sender.send(message) {
        warn!("Failed to send {}: {e}", message.tag());
        health.set_flatline();
    }
}
