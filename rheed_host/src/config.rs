//! Host configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [link]
//! # Omit to use the first USB serial port.
//! port = "/dev/ttyUSB0"
//!
//! [session]
//! image_dir = "/rheed_images"
//! heartbeat_ms = 5000
//!
//! [classifier]
//! command = ["python3", "classify.py", "--model", "rheed_model.pth"]
//! timeout_ms = 30000
//! ```

use rheed_common::config::{ConfigError, SharedConfig, millis};
use rheed_common::consts::{
    DEFAULT_BAUD_RATE, HANDSHAKE_POLL, HEARTBEAT_PERIOD, LIVENESS_TICK, LIVENESS_WINDOW_TICKS,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub link: HostLinkConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostLinkConfig {
    /// Explicit serial port; discovered when absent.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Read timeout of the link reader and handshake wait.
    #[serde(rename = "poll_ms", with = "millis")]
    pub poll: Duration,
    /// Delay before the next connection attempt.
    #[serde(rename = "reconnect_ms", with = "millis")]
    pub reconnect: Duration,
}

impl Default for HostLinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            poll: HANDSHAKE_POLL,
            reconnect: Duration::from_secs(1),
        }
    }
}

/// Per-session periods and the image source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "heartbeat_ms", with = "millis")]
    pub heartbeat: Duration,
    #[serde(rename = "liveness_tick_ms", with = "millis")]
    pub liveness_tick: Duration,
    pub liveness_window_ticks: u32,
    /// Directory the camera writes captures into.
    pub image_dir: PathBuf,
    #[serde(rename = "image_poll_ms", with = "millis")]
    pub image_poll: Duration,
    /// Heartbeat hold after `READY`.
    #[serde(rename = "ready_delay_ms", with = "millis")]
    pub ready_delay: Duration,
    /// Heartbeat hold after a submitted secret.
    #[serde(rename = "secret_delay_ms", with = "millis")]
    pub secret_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT_PERIOD,
            liveness_tick: LIVENESS_TICK,
            liveness_window_ticks: LIVENESS_WINDOW_TICKS,
            image_dir: PathBuf::from("/rheed_images"),
            image_poll: Duration::from_millis(500),
            ready_delay: Duration::from_secs(1),
            secret_delay: Duration::from_secs(1),
        }
    }
}

/// External classifier program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Program and leading arguments; the image path is appended. Empty
    /// disables classification.
    pub command: Vec<String>,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.link.port.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("link.port cannot be empty when set"));
        }
        if self.link.baud_rate == 0 {
            return Err(invalid("link.baud_rate must be positive"));
        }

        let s = &self.session;
        for (name, value) in [
            ("link.poll_ms", self.link.poll),
            ("heartbeat_ms", s.heartbeat),
            ("liveness_tick_ms", s.liveness_tick),
            ("image_poll_ms", s.image_poll),
            ("classifier.timeout_ms", self.classifier.timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{name} must be positive")));
            }
        }

        // The controller must hear at least one heartbeat per window even
        // with one lost.
        let window = s.liveness_tick * s.liveness_window_ticks;
        if window < s.heartbeat * 2 {
            return Err(invalid(&format!(
                "liveness window {window:?} must cover two heartbeats ({:?} each)",
                s.heartbeat
            )));
        }
        if s.ready_delay >= window || s.secret_delay >= window {
            return Err(invalid("heartbeat hold must be shorter than the liveness window"));
        }

        if s.image_dir.as_os_str().is_empty() {
            return Err(invalid("session.image_dir cannot be empty"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}
