//! Host error type.
//!
//! Link failures end a session and are retried by the reconnect loop.
//! Classifier and viewer failures never reach this type; they are reported
//! to the operator and the session carries on.

use rheed_common::config::ConfigError;
use rheed_common::link::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A session task panicked or was cancelled unexpectedly.
    #[error("session task `{task}` failed: {detail}")]
    Task { task: &'static str, detail: String },
}

impl HostError {
    pub(crate) fn task(task: &'static str, err: tokio::task::JoinError) -> Self {
        Self::Task {
            task,
            detail: err.to_string(),
        }
    }
}
