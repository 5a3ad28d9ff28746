//! Line transports for the controller/host link.
//!
//! A [`Link`] is split into a cloneable [`LinkSender`] (several tasks emit
//! messages) and a single [`LinkReceiver`] owned by the reader task.
//! Transports implement [`LineReader`] and [`LineWriter`]; the serial port
//! and an in-memory pair are provided.

pub mod memory;
pub mod serial;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

use crate::consts::SECRET_PREFIX;
use crate::protocol::Message;

/// Link-level failure. Recovered by reconnecting from scratch.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Serial port could not be opened.
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Serial port configuration failed.
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    /// Read or write failed.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The other end went away.
    #[error("link closed by peer")]
    Closed,

    /// No candidate serial port was found.
    #[error("no USB serial port found")]
    NoPort,

    /// Handshake was cancelled before the reply arrived.
    #[error("handshake aborted")]
    HandshakeAborted,
}

/// Blocking line source.
pub trait LineReader: Send {
    /// Wait up to `timeout` for one complete line (without terminator).
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>;
}

/// Line sink. Implementations append the newline terminator.
pub trait LineWriter: Send {
    /// Write one line and flush it.
    fn write_line(&mut self, line: &str) -> Result<(), LinkError>;
}

/// Cloneable sending half, serialized behind one lock.
#[derive(Clone)]
pub struct LinkSender {
    inner: Arc<Mutex<Box<dyn LineWriter>>>,
}

impl LinkSender {
    /// Wrap a writer.
    pub fn new(writer: Box<dyn LineWriter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Encode and send one message.
    pub fn send(&self, message: &Message) -> Result<(), LinkError> {
        trace!(%message, "tx");
        self.inner.lock().write_line(&message.encode())
    }
}

/// Receiving half, owned by exactly one reader.
pub struct LinkReceiver {
    inner: Box<dyn LineReader>,
}

impl LinkReceiver {
    /// Wrap a reader.
    pub fn new(reader: Box<dyn LineReader>) -> Self {
        Self { inner: reader }
    }

    /// Wait up to `timeout` for one raw line.
    ///
    /// Raw lines are returned so callers can count unparseable traffic as
    /// proof of life before classifying it.
    pub fn recv_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        let line = self.inner.read_line(timeout)?;
        match line.as_deref() {
            Some(l) if l.trim_start().starts_with(SECRET_PREFIX) => {
                trace!("rx {SECRET_PREFIX}<redacted>");
            }
            Some(l) => trace!(line = %l, "rx"),
            None => {}
        }
        Ok(line)
    }
}

/// Both halves of one established connection.
pub struct Link {
    /// Sending half.
    pub sender: LinkSender,
    /// Receiving half.
    pub receiver: LinkReceiver,
}

impl Link {
    /// Build a link from a reader and a writer.
    pub fn new(reader: Box<dyn LineReader>, writer: Box<dyn LineWriter>) -> Self {
        Self {
            sender: LinkSender::new(writer),
            receiver: LinkReceiver::new(reader),
        }
    }

    /// Split into sending and receiving halves.
    pub fn into_parts(self) -> (LinkSender, LinkReceiver) {
        (self.sender, self.receiver)
    }
}
