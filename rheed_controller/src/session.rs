//! Controller session supervisor.
//!
//! One session spans one connection: handshake, then a fixed set of tasks
//! that live until the link flatlines or the process stops.
//!
//! | Task | Period | Role |
//! |---|---|---|
//! | reader | link poll | record traffic, route host messages |
//! | liveness | liveness tick | flatline after a silent window |
//! | exposure | exposure tick | timer, tier, lockout ratchet, report seconds |
//! | blinker | blink half-period | drive the indicator lamps |
//! | buttons | button poll | start/stop edge detection |
//! | runner | event driven | beam FSM (caller's thread) |
//!
//! Exposure, tier and the lockout flag outlive sessions; everything else is
//! reset when a session ends.

use rheed_common::handshake;
use rheed_common::link::{Link, LinkError, LinkReceiver, LinkSender};
use rheed_common::liveness::{self, LinkHealth};
use rheed_common::protocol::Message;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::control::{ControlBlock, SharedControl};
use crate::cycle::{CycleRunner, SessionEnd};
use crate::driver::{self, ActuatorDriver, OperatorPanel, SharedDriver};
use crate::error::ControllerError;
use crate::indicator::{Indicator, LampPlan, LampSet};
use crate::safety::lockout::LockoutGate;

/// Beam safety controller.
pub struct Controller {
    config: ControllerConfig,
    shared: SharedControl,
    driver: SharedDriver,
    panel: Box<dyn OperatorPanel>,
    runner: CycleRunner,
    running: Arc<AtomicBool>,
}

impl Controller {
    /// Initialize the driver and build a controller in `Idle`.
    pub fn new(
        config: ControllerConfig,
        secret: String,
        mut actuator: Box<dyn ActuatorDriver>,
        panel: Box<dyn OperatorPanel>,
    ) -> Result<Self, ControllerError> {
        actuator.init()?;
        actuator.set_beam(false)?;
        actuator.set_shutter_duty(config.shutter.closed_duty())?;
        info!(driver = actuator.name(), "Actuator driver ready");

        let shared = SharedControl::new(ControlBlock::new(config.thresholds));
        let driver = driver::shared(actuator);
        let runner = CycleRunner::new(
            shared.clone(),
            driver.clone(),
            LockoutGate::new(secret),
            config.timing.clone(),
            &config.shutter,
        );

        Ok(Self {
            config,
            shared,
            driver,
            panel,
            runner,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Clearing this flag ends the current session and the reconnect loop.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Handle to the shared control block.
    pub fn control(&self) -> SharedControl {
        self.shared.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one session over `link`.
    ///
    /// Blocks in the handshake until the host probes, then until the link
    /// flatlines or the running flag is cleared.
    pub fn run_session(&mut self, link: Link) -> Result<SessionEnd, ControllerError> {
        let (sender, mut receiver) = link.into_parts();
        let running = &*self.running;

        match handshake::accept(&sender, &mut receiver, self.config.link.poll, running) {
            Ok(()) => {}
            Err(LinkError::HandshakeAborted) => {
                let state = self.shared.read(|cb| cb.state);
                return Ok(SessionEnd::Shutdown {
                    state,
                    failsafe: crate::safety::failsafe::failsafe_for(state),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let health = LinkHealth::new();
        health.mark_live();
        info!("Session started");

        let timing = &self.config.timing;
        let poll = self.config.link.poll;
        let shared = &self.shared;
        let driver = &self.driver;
        let panel = &mut self.panel;
        let runner = &mut self.runner;
        let health = &health;
        let sender = &sender;

        let end = thread::scope(|s| {
            let reader = s.spawn(move || read_loop(receiver, sender, shared, health, running, poll));
            let monitor = s.spawn(move || {
                liveness::run_monitor(
                    health,
                    timing.liveness_tick,
                    timing.liveness_window_ticks,
                    running,
                    || shared.notify(),
                )
            });
            let exposure = s.spawn(move || exposure_loop(shared, sender, health, running, timing));
            let blinker = s.spawn(move || blink_loop(shared, driver, health, running, timing));
            let buttons =
                s.spawn(move || button_loop(panel.as_mut(), shared, health, running, timing));

            let end = runner.run(sender, health, running);
            // Release the other tasks if the runner stopped on its own.
            health.set_flatline();

            for (name, handle) in [
                ("reader", reader),
                ("liveness", monitor),
                ("exposure", exposure),
                ("blinker", blinker),
                ("buttons", buttons),
            ] {
                if handle.join().is_err() {
                    return Err(ControllerError::TaskPanicked(name));
                }
            }
            Ok(end)
        })?;

        let stats = self.runner.stats();
        info!(
            cycles = stats.cycles,
            transitions = stats.transitions,
            faults = stats.faults,
            "Session ended: {end:?}"
        );
        Ok(end)
    }

    /// Make the hardware safe and release the driver.
    pub fn shutdown(self) -> Result<(), ControllerError> {
        let mut driver = self.driver.lock();
        driver.set_shutter_duty(self.config.shutter.closed_duty())?;
        driver.set_beam(false)?;
        driver.set_lamps(LampSet::empty())?;
        driver.shutdown()?;
        info!("Controller shut down");
        Ok(())
    }
}

fn alive(health: &LinkHealth, running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst) && !health.is_flatline()
}

fn read_loop(
    mut receiver: LinkReceiver,
    sender: &LinkSender,
    shared: &SharedControl,
    health: &LinkHealth,
    running: &AtomicBool,
    poll: std::time::Duration,
) {
    while alive(health, running) {
        let line = match receiver.recv_line(poll) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                warn!("Link read failed: {e}");
                health.set_flatline();
                shared.notify();
                return;
            }
        };
        health.record_traffic();

        match Message::parse(&line) {
            Ok(Message::Pulse) => {}
            Ok(Message::Secret(attempt)) => {
                info!("Secret attempt received");
                shared.update(|cb| cb.submit_secret(attempt));
            }
            Ok(Message::Ready) => {
                debug!("Host displayed the image");
                shared.update(|cb| cb.mark_image_ready());
            }
            Ok(Message::Stop) => {
                info!("Stop requested by host");
                shared.update(|cb| cb.request_stop());
            }
            Ok(Message::Marco) => {
                if let Err(e) = sender.send(&Message::Polo) {
                    warn!("Failed to answer probe: {e}");
                }
            }
            Ok(other) => debug!("Ignoring {other:?} from host"),
            Err(e) => debug!("Unparseable line from host: {e}"),
        }
    }
}

fn exposure_loop(
    shared: &SharedControl,
    sender: &LinkSender,
    health: &LinkHealth,
    running: &AtomicBool,
    timing: &crate::config::TimingConfig,
) {
    loop {
        thread::sleep(timing.exposure_tick);
        if !alive(health, running) {
            return;
        }

        let ((seconds, eval), _) = shared.apply(|cb| cb.tick_exposure());
        if eval.changed {
            info!(tier = ?eval.tier, seconds, "Safety tier changed");
        }
        if eval.engage_lockout {
            warn!(seconds, "Exposure limit reached, lockout engaged");
            shared.notify();
        }

        if let Err(e) = sender.send(&Message::Exposure(seconds)) {
            warn!("Failed to report exposure: {e}");
            health.set_flatline();
            shared.notify();
            return;
        }
    }
}

fn blink_loop(
    shared: &SharedControl,
    driver: &SharedDriver,
    health: &LinkHealth,
    running: &AtomicBool,
    timing: &crate::config::TimingConfig,
) {
    let mut indicator = Indicator::new();
    let mut shown: Option<LampSet> = None;

    while alive(health, running) {
        let plan = shared.read(|cb| LampPlan::new(cb.state, cb.aborted, cb.tier()));
        indicator.apply(plan);
        let lamps = indicator.advance();
        if shown != Some(lamps) {
            match driver.lock().set_lamps(lamps) {
                Ok(()) => shown = Some(lamps),
                Err(e) => warn!("Failed to set lamps: {e}"),
            }
        }
        thread::sleep(timing.blink);
    }
}

fn button_loop(
    panel: &mut dyn OperatorPanel,
    shared: &SharedControl,
    health: &LinkHealth,
    running: &AtomicBool,
    timing: &crate::config::TimingConfig,
) {
    let mut start_was = false;
    let mut stop_was = false;

    while alive(health, running) {
        let start = panel.start_pressed();
        let stop = panel.stop_pressed();

        if start && !start_was {
            debug!("Start button pressed");
            shared.update(|cb| cb.press_start());
        }
        if stop && !stop_was {
            debug!("Stop button pressed");
            shared.update(|cb| cb.press_stop());
        }

        start_was = start;
        stop_was = stop;
        thread::sleep(timing.button_poll);
    }
}
