//! RHEED Common Library
//!
//! Shared pieces used by both ends of the beam controller link.
//!
//! # Module Structure
//!
//! - [`protocol`] - Tag vocabulary and line codec
//! - [`link`] - Line transports (serial port, in-memory pair)
//! - [`handshake`] - `MARCO!` / `POLO!` connection probe
//! - [`liveness`] - Flatline detection window and shared link health
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Protocol and timing defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use rheed_common::prelude::*;
//!
//! let msg = Message::parse("BEAM_ON").unwrap();
//! assert_eq!(msg, Message::BeamOn);
//! ```

pub mod config;
pub mod consts;
pub mod handshake;
pub mod link;
pub mod liveness;
pub mod prelude;
pub mod protocol;
