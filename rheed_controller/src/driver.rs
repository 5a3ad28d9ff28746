//! Actuator and operator-panel driver traits.
//!
//! The controller drives hardware exclusively through these traits so the
//! same session code runs against GPIO backends and the in-process
//! [`simulation`] driver.
//!
//! # Lifecycle
//!
//! 1. `init()` - called once before the first session
//! 2. `set_*()` - called from the FSM runner, the blinker and the fail-safe
//! 3. `shutdown()` - called once when the controller exits
//!
//! Actuation calls are expected to return promptly. Physical dwell times
//! (shutter travel, camera exposure) are held by the caller, not the driver.

pub mod simulation;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::indicator::LampSet;

/// Error types for actuation.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// Driver initialization failed.
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// An output could not be driven.
    #[error("Actuation of {output} failed: {detail}")]
    Actuation {
        output: &'static str,
        detail: String,
    },
}

/// Beam, shutter, camera and lamp outputs.
pub trait ActuatorDriver: Send {
    /// Driver identifier (e.g. "simulation").
    fn name(&self) -> &'static str;

    /// Prepare the outputs. Leaves beam blanked and shutter closed.
    fn init(&mut self) -> Result<(), DriverError>;

    /// Unblank (`true`) or blank (`false`) the beam.
    fn set_beam(&mut self, on: bool) -> Result<(), DriverError>;

    /// Drive the shutter servo with a 16-bit PWM duty at 50 Hz.
    fn set_shutter_duty(&mut self, duty: u16) -> Result<(), DriverError>;

    /// Raise or lower the camera trigger line.
    fn set_camera_trigger(&mut self, active: bool) -> Result<(), DriverError>;

    /// Light exactly the lamps in `lamps`.
    fn set_lamps(&mut self, lamps: LampSet) -> Result<(), DriverError>;

    /// Release the outputs.
    fn shutdown(&mut self) -> Result<(), DriverError>;
}

/// Start and stop buttons.
///
/// Implementations report the current level; the button poller does the
/// edge detection.
pub trait OperatorPanel: Send {
    /// Start (green) button is held.
    fn start_pressed(&mut self) -> bool;

    /// Stop (red) button is held.
    fn stop_pressed(&mut self) -> bool;
}

/// Actuator shared between the FSM runner and the lamp blinker.
pub type SharedDriver = Arc<Mutex<Box<dyn ActuatorDriver>>>;

/// Wrap a driver for sharing.
pub fn shared(driver: Box<dyn ActuatorDriver>) -> SharedDriver {
    Arc::new(Mutex::new(driver))
}

/// Servo pulse-width calibration.
///
/// Angle θ in degrees maps to `((θ / 180) · (max − min) + min) << 4`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoCalibration {
    pub min_pulse: u16,
    pub max_pulse: u16,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            min_pulse: 40,
            max_pulse: 115,
        }
    }
}

impl ServoCalibration {
    /// PWM duty for `angle` degrees, clamped to `[0, 180]`.
    pub fn duty_u16(&self, angle: f32) -> u16 {
        let angle = angle.clamp(0.0, 180.0);
        let span = f32::from(self.max_pulse.saturating_sub(self.min_pulse));
        let pulse = (angle / 180.0) * span + f32::from(self.min_pulse);
        (pulse as u16) << 4
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_pulse >= self.max_pulse {
            return Err(format!(
                "servo min_pulse ({}) must be below max_pulse ({})",
                self.min_pulse, self.max_pulse
            ));
        }
        // Duty is shifted left by 4 and must fit in 16 bits.
        if self.max_pulse > u16::MAX >> 4 {
            return Err(format!("servo max_pulse {} out of range", self.max_pulse));
        }
        Ok(())
    }
}
