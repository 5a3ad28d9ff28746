//! Software simulation of the controller hardware.
//!
//! [`SimulatedHardware`] records the most recent [`LOG_CAPACITY`] beam,
//! shutter and camera actuations so tests and the dry-run binary can observe
//! what the controller did. A [`SimProbe`] handle reads that record from
//! another thread and can make chosen outputs fail. The
//! [`SimulatedPanel`] turns presses requested through a [`PanelHandle`] into
//! one-shot button levels.

use bitflags::bitflags;
use heapless::HistoryBuf;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::{ActuatorDriver, DriverError, OperatorPanel};
use crate::indicator::LampSet;

/// One recorded actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    Beam(bool),
    ShutterDuty(u16),
    CameraTrigger(bool),
}

/// Actuations kept in the record; older entries are overwritten.
pub const LOG_CAPACITY: usize = 256;

bitflags! {
    /// Simulated outputs, used to select injected faults.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Outputs: u8 {
        const BEAM    = 0b001;
        const SHUTTER = 0b010;
        const CAMERA  = 0b100;
    }
}

impl Outputs {
    fn of(actuation: Actuation) -> Self {
        match actuation {
            Actuation::Beam(_) => Self::BEAM,
            Actuation::ShutterDuty(_) => Self::SHUTTER,
            Actuation::CameraTrigger(_) => Self::CAMERA,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    beam_on: bool,
    shutter_duty: u16,
    camera_trigger: bool,
    lamps: LampSet,
    log: HistoryBuf<Actuation, LOG_CAPACITY>,
    failing: Outputs,
    initialized: bool,
}

/// Simulated beam blanker, shutter servo, camera trigger and lamps.
pub struct SimulatedHardware {
    state: Arc<Mutex<SimState>>,
}

/// Read side of a [`SimulatedHardware`].
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHardware {
    /// Create a driver and its probe.
    pub fn new() -> (Self, SimProbe) {
        let state = Arc::new(Mutex::new(SimState::default()));
        (
            Self {
                state: state.clone(),
            },
            SimProbe { state },
        )
    }

    fn actuate(&self, output: &'static str, actuation: Actuation) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        if s.failing.intersects(Outputs::of(actuation)) {
            return Err(DriverError::Actuation {
                output,
                detail: "injected fault".to_string(),
            });
        }
        match actuation {
            Actuation::Beam(on) => s.beam_on = on,
            Actuation::ShutterDuty(duty) => s.shutter_duty = duty,
            Actuation::CameraTrigger(active) => s.camera_trigger = active,
        }
        s.log.write(actuation);
        debug!(?actuation, "sim actuation");
        Ok(())
    }
}

impl ActuatorDriver for SimulatedHardware {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn init(&mut self) -> Result<(), DriverError> {
        let mut s = self.state.lock();
        s.beam_on = false;
        s.camera_trigger = false;
        s.initialized = true;
        info!("Simulation driver initialized");
        Ok(())
    }

    fn set_beam(&mut self, on: bool) -> Result<(), DriverError> {
        self.actuate("beam", Actuation::Beam(on))
    }

    fn set_shutter_duty(&mut self, duty: u16) -> Result<(), DriverError> {
        self.actuate("shutter", Actuation::ShutterDuty(duty))
    }

    fn set_camera_trigger(&mut self, active: bool) -> Result<(), DriverError> {
        self.actuate("camera", Actuation::CameraTrigger(active))
    }

    fn set_lamps(&mut self, lamps: LampSet) -> Result<(), DriverError> {
        self.state.lock().lamps = lamps;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        self.state.lock().initialized = false;
        info!("Simulation driver shut down");
        Ok(())
    }
}

impl SimProbe {
    pub fn beam_on(&self) -> bool {
        self.state.lock().beam_on
    }

    pub fn shutter_duty(&self) -> u16 {
        self.state.lock().shutter_duty
    }

    pub fn camera_trigger(&self) -> bool {
        self.state.lock().camera_trigger
    }

    pub fn lamps(&self) -> LampSet {
        self.state.lock().lamps
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Copy of the actuation record, oldest first.
    pub fn log(&self) -> Vec<Actuation> {
        self.state.lock().log.oldest_ordered().copied().collect()
    }

    /// Drain the actuation record.
    pub fn take_log(&self) -> Vec<Actuation> {
        let mut s = self.state.lock();
        let log = s.log.oldest_ordered().copied().collect();
        s.log.clear();
        log
    }

    /// Make every subsequent beam/shutter/camera call fail until cleared.
    pub fn inject_fault(&self, fail: bool) {
        self.inject_output_fault(Outputs::all(), fail);
    }

    /// Make calls to `outputs` fail (or succeed again).
    pub fn inject_output_fault(&self, outputs: Outputs, fail: bool) {
        self.state.lock().failing.set(outputs, fail);
    }
}

#[derive(Debug, Default)]
struct Buttons {
    start: AtomicBool,
    stop: AtomicBool,
}

/// Simulated start/stop buttons.
pub struct SimulatedPanel {
    buttons: Arc<Buttons>,
}

/// Presses buttons on a [`SimulatedPanel`].
#[derive(Clone)]
pub struct PanelHandle {
    buttons: Arc<Buttons>,
}

impl SimulatedPanel {
    pub fn new() -> (Self, PanelHandle) {
        let buttons = Arc::new(Buttons::default());
        (
            Self {
                buttons: buttons.clone(),
            },
            PanelHandle { buttons },
        )
    }
}

impl OperatorPanel for SimulatedPanel {
    // A press reads as held exactly once, then released.
    fn start_pressed(&mut self) -> bool {
        self.buttons.start.swap(false, Ordering::SeqCst)
    }

    fn stop_pressed(&mut self) -> bool {
        self.buttons.stop.swap(false, Ordering::SeqCst)
    }
}

impl PanelHandle {
    pub fn press_start(&self) {
        self.buttons.start.store(true, Ordering::SeqCst);
    }

    pub fn press_stop(&self) {
        self.buttons.stop.store(true, Ordering::SeqCst);
    }
}
