//! Controller configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "rheed-controller"
//!
//! [link]
//! port = "/dev/serial0"
//! baud_rate = 115200
//!
//! [timing]
//! shutter_dwell_ms = 10000
//!
//! [thresholds]
//! locked = 570
//!
//! [lockout]
//! secret_file = "/etc/rheed/secret"
//! ```
//!
//! Every section is optional except `[lockout]`, which must provide a
//! non-empty secret either inline or from a file.

use rheed_common::config::{ConfigError, SharedConfig, millis};
use rheed_common::consts::{DEFAULT_BAUD_RATE, HANDSHAKE_POLL, LIVENESS_TICK, LIVENESS_WINDOW_TICKS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::ServoCalibration;
use crate::error::ControllerError;
use crate::safety::threshold::TierThresholds;

/// Complete controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub thresholds: TierThresholds,
    #[serde(default)]
    pub shutter: ShutterConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
}

/// Serial link to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout of the link reader and handshake wait.
    #[serde(rename = "poll_ms", with = "millis")]
    pub poll: Duration,
    /// Delay before reopening the port after a failed open or a flatline.
    #[serde(rename = "reconnect_ms", with = "millis")]
    pub reconnect: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/serial0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll: HANDSHAKE_POLL,
            reconnect: Duration::from_secs(1),
        }
    }
}

/// Cycle, tick and dwell periods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound on how long the FSM waits in a state with nothing to do.
    #[serde(rename = "cycle_ms", with = "millis")]
    pub cycle: Duration,
    #[serde(rename = "exposure_tick_ms", with = "millis")]
    pub exposure_tick: Duration,
    #[serde(rename = "liveness_tick_ms", with = "millis")]
    pub liveness_tick: Duration,
    pub liveness_window_ticks: u32,
    /// Beam on sample before the photo is taken.
    #[serde(rename = "shutter_dwell_ms", with = "millis")]
    pub shutter_dwell: Duration,
    /// Camera trigger hold.
    #[serde(rename = "capture_window_ms", with = "millis")]
    pub capture_window: Duration,
    /// Shutter travel to closed.
    #[serde(rename = "shutter_settle_ms", with = "millis")]
    pub shutter_settle: Duration,
    #[serde(rename = "button_poll_ms", with = "millis")]
    pub button_poll: Duration,
    /// Half-period of blinking lamps.
    #[serde(rename = "blink_ms", with = "millis")]
    pub blink: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycle: Duration::from_secs(1),
            exposure_tick: Duration::from_secs(1),
            liveness_tick: LIVENESS_TICK,
            liveness_window_ticks: LIVENESS_WINDOW_TICKS,
            shutter_dwell: Duration::from_secs(10),
            capture_window: Duration::from_secs(3),
            shutter_settle: Duration::from_secs(1),
            button_poll: Duration::from_millis(100),
            blink: Duration::from_millis(500),
        }
    }
}

/// Shutter servo angles and calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutterConfig {
    /// Angle that lets the beam reach the sample [deg].
    pub capture_angle: f32,
    /// Angle that blocks the beam [deg].
    pub closed_angle: f32,
    pub calibration: ServoCalibration,
}

impl Default for ShutterConfig {
    fn default() -> Self {
        Self {
            capture_angle: 60.0,
            closed_angle: 0.0,
            calibration: ServoCalibration::default(),
        }
    }
}

impl ShutterConfig {
    pub fn open_duty(&self) -> u16 {
        self.calibration.duty_u16(self.capture_angle)
    }

    pub fn closed_duty(&self) -> u16 {
        self.calibration.duty_u16(self.closed_angle)
    }
}

/// Source of the shared lockout secret.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub secret: Option<String>,
    pub secret_file: Option<PathBuf>,
}

impl std::fmt::Debug for LockoutConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_file", &self.secret_file)
            .finish()
    }
}

impl ControllerConfig {
    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.link.port.is_empty() {
            return Err(invalid("link.port cannot be empty"));
        }
        if self.link.baud_rate == 0 {
            return Err(invalid("link.baud_rate must be positive"));
        }

        let t = &self.timing;
        for (name, value) in [
            ("cycle_ms", t.cycle),
            ("exposure_tick_ms", t.exposure_tick),
            ("liveness_tick_ms", t.liveness_tick),
            ("button_poll_ms", t.button_poll),
            ("blink_ms", t.blink),
            ("link.poll_ms", self.link.poll),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{name} must be positive")));
            }
        }
        if t.liveness_window_ticks < 2 {
            return Err(invalid("liveness_window_ticks must be at least 2"));
        }

        self.thresholds
            .validate()
            .map_err(ConfigError::ValidationError)?;
        self.shutter
            .calibration
            .validate()
            .map_err(ConfigError::ValidationError)?;
        for angle in [self.shutter.capture_angle, self.shutter.closed_angle] {
            if !(0.0..=180.0).contains(&angle) {
                return Err(invalid(&format!("shutter angle {angle} outside [0, 180]")));
            }
        }

        match (&self.lockout.secret, &self.lockout.secret_file) {
            (Some(s), None) if s.is_empty() => Err(invalid("lockout.secret cannot be empty")),
            (Some(_), Some(_)) => Err(invalid(
                "set only one of lockout.secret and lockout.secret_file",
            )),
            (None, None) => Err(invalid("lockout.secret or lockout.secret_file is required")),
            _ => Ok(()),
        }
    }

    /// Resolve the shared secret, reading `secret_file` if configured.
    ///
    /// A single trailing newline in the file is dropped.
    pub fn resolve_secret(&self) -> Result<String, ControllerError> {
        if let Some(secret) = &self.lockout.secret {
            return Ok(secret.clone());
        }
        let path = self
            .lockout
            .secret_file
            .as_deref()
            .ok_or_else(|| invalid("no lockout secret configured"))?;
        let secret = read_secret_file(path)?;
        if secret.is_empty() {
            return Err(invalid(&format!("secret file {} is empty", path.display())).into());
        }
        Ok(secret)
    }
}

fn read_secret_file(path: &Path) -> Result<String, ControllerError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ControllerError::SecretFile {
        path: path.display().to_string(),
        source,
    })?;
    let trimmed = raw
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(&raw);
    Ok(trimmed.to_string())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rheed_common::config::ConfigLoader;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_follow_panel_timings() {
        let cfg = ControllerConfig::from_toml("[lockout]\nsecret = \"x\"").unwrap();
        assert_eq!(cfg.link.baud_rate, 115_200);
        assert_eq!(cfg.timing.shutter_dwell, Duration::from_secs(10));
        assert_eq!(cfg.timing.capture_window, Duration::from_secs(3));
        assert_eq!(cfg.timing.liveness_window_ticks, 10);
        assert_eq!(cfg.thresholds, TierThresholds::DEFAULT);
        assert_eq!(cfg.shutter.open_duty(), 65 << 4);
        assert_eq!(cfg.shutter.closed_duty(), 40 << 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_secret_is_rejected() {
        let cfg = ControllerConfig::from_toml("").unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn unordered_thresholds_are_rejected() {
        let cfg = ControllerConfig::from_toml(
            "[thresholds]\nlocked = 100\n[lockout]\nsecret = \"x\"",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn timing_overrides_parse_as_millis() {
        let cfg = ControllerConfig::from_toml(
            "[timing]\nshutter_dwell_ms = 20\ncycle_ms = 5\n[lockout]\nsecret = \"x\"",
        )
        .unwrap();
        assert_eq!(cfg.timing.shutter_dwell, Duration::from_millis(20));
        assert_eq!(cfg.timing.cycle, Duration::from_millis(5));
        assert_eq!(cfg.timing.blink, Duration::from_millis(500));
    }

    #[test]
    fn secret_file_trailing_newline_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "hunter2").unwrap();
        file.flush().unwrap();

        let cfg = ControllerConfig {
            lockout: LockoutConfig {
                secret: None,
                secret_file: Some(file.path().to_path_buf()),
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.resolve_secret().unwrap(), "hunter2");
    }

    #[test]
    fn missing_secret_file_is_reported() {
        let cfg = ControllerConfig {
            lockout: LockoutConfig {
                secret: None,
                secret_file: Some(PathBuf::from("/nonexistent/secret")),
            },
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_secret(),
            Err(ControllerError::SecretFile { .. })
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let cfg = LockoutConfig {
            secret: Some("hunter2".to_string()),
            secret_file: None,
        };
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
