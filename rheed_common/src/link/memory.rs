//! In-memory link pair.
//!
//! Used by the simulation binaries and by tests to connect a controller and
//! a host (or a scripted peer) without a serial port.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::{LineReader, LineWriter, Link, LinkError};

struct ChannelReader {
    rx: Receiver<String>,
}

impl LineReader for ChannelReader {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }
}

struct ChannelWriter {
    tx: Sender<String>,
}

impl LineWriter for ChannelWriter {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.tx.send(line.to_string()).map_err(|_| LinkError::Closed)
    }
}

/// Create two connected link ends. Lines written on one are read on the other.
pub fn pair() -> (Link, Link) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let a = Link::new(
        Box::new(ChannelReader { rx: a_rx }),
        Box::new(ChannelWriter { tx: a_tx }),
    );
    let b = Link::new(
        Box::new(ChannelReader { rx: b_rx }),
        Box::new(ChannelWriter { tx: b_tx }),
    );
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    #[test]
    fn lines_cross_over() {
        let (a, b) = pair();
        let (a_tx, mut a_rx) = a.into_parts();
        let (b_tx, mut b_rx) = b.into_parts();

        a_tx.send(&Message::Marco).unwrap();
        b_tx.send(&Message::Exposure(7)).unwrap();

        let got = b_rx.recv_line(Duration::from_millis(100)).unwrap();
        assert_eq!(got.as_deref(), Some("MARCO!"));
        let got = a_rx.recv_line(Duration::from_millis(100)).unwrap();
        assert_eq!(got.as_deref(), Some("7"));
    }

    #[test]
    fn read_times_out_with_none() {
        let (a, _b) = pair();
        let (_tx, mut rx) = a.into_parts();
        assert!(rx.recv_line(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn dropped_peer_reports_closed() {
        let (a, b) = pair();
        drop(b);
        let (tx, mut rx) = a.into_parts();
        assert!(matches!(
            rx.recv_line(Duration::from_millis(5)),
            Err(LinkError::Closed)
        ));
        assert!(matches!(tx.send(&Message::Pulse), Err(LinkError::Closed)));
    }
}
