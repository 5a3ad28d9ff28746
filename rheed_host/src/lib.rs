//! # RHEED Host
//!
//! Operator-side companion of the beam controller. It keeps the link alive
//! with heartbeats, narrates controller messages on the console, forwards
//! the lockout secret, shows each new capture and classifies accepted ones.
//!
//! # Module Structure
//!
//! - [`session`] - Async session supervisor (one task per concern)
//! - [`dispatcher`] - Inbound message classification and operator notices
//! - [`heartbeat`] - Heartbeat suspension around round trips
//! - [`images`] - Newest-capture detection in the image directory
//! - [`classifier`] - External classifier program adapter
//! - [`viewer`] - Image display collaborator
//! - [`console`] - Operator console (notices and secret prompt)
//! - [`config`] - Host configuration
//! - [`error`] - Host error type

pub mod classifier;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod images;
pub mod session;
pub mod viewer;

pub use config::HostConfig;
pub use error::HostError;
pub use session::{Host, HostSessionEnd};
