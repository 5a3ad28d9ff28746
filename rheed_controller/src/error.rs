//! Controller error type.
//!
//! Link failures and flatlines end a session and are recovered by the
//! reconnect loop; only configuration and driver start-up errors are fatal.

use rheed_common::config::ConfigError;
use rheed_common::link::LinkError;
use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The shared secret could not be read.
    #[error("failed to read secret file {path}: {source}")]
    SecretFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A session task panicked.
    #[error("session task `{0}` panicked")]
    TaskPanicked(&'static str),
}
