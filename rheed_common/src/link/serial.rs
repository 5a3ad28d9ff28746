//! Serial port transport.
//!
//! Lines are newline-terminated on the wire. Incoming bytes are buffered
//! until a terminator arrives, so a line split across reads is reassembled.

use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{LineReader, LineWriter, Link, LinkError};

const READ_CHUNK: usize = 64;

struct SerialReader {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SerialReader {
    fn take_line(&mut self) -> Option<String> {
        split_line(&mut self.pending)
    }
}

/// Remove the first complete line from `pending`, without its terminator.
fn split_line(pending: &mut Vec<u8>) -> Option<String> {
    let pos = pending.iter().position(|&b| b == b'\n')?;
    let raw: Vec<u8> = pending.drain(..=pos).collect();
    Some(
        String::from_utf8_lossy(&raw)
            .trim_end_matches(['\r', '\n'])
            .to_string(),
    )
}

impl LineReader for SerialReader {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port.set_timeout(remaining)?;

            match self.port.read(&mut chunk) {
                Ok(0) => return Err(LinkError::Closed),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(Some(line));
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }
}

struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl LineWriter for SerialWriter {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }
}

/// Open `path` at `baud` and wrap it as a [`Link`].
pub fn open(path: &str, baud: u32) -> Result<Link, LinkError> {
    let port = serialport::new(path, baud)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|source| LinkError::Open {
            port: path.to_string(),
            source,
        })?;
    let writer = port.try_clone()?;
    info!("Opened serial port {path} at {baud} baud");

    Ok(Link::new(
        Box::new(SerialReader {
            port,
            pending: Vec::new(),
        }),
        Box::new(SerialWriter { port: writer }),
    ))
}

/// Pick the first port that looks like a USB serial adapter.
pub fn discover_usb_port() -> Result<String, LinkError> {
    let ports = serialport::available_ports()?;
    for port in &ports {
        debug!("Candidate serial port {} ({:?})", port.port_name, port.port_type);
    }
    ports
        .into_iter()
        .find(|p| is_usb(&p.port_name, &p.port_type))
        .map(|p| p.port_name)
        .ok_or(LinkError::NoPort)
}

fn is_usb(name: &str, kind: &SerialPortType) -> bool {
    match kind {
        SerialPortType::UsbPort(_) => true,
        _ => name.contains("USB") || name.contains("ttyACM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_line_strips_only_the_terminator() {
        let mut pending = b"PWD:ab \r\nPULSE\nPART".to_vec();
        assert_eq!(split_line(&mut pending).as_deref(), Some("PWD:ab "));
        assert_eq!(split_line(&mut pending).as_deref(), Some("PULSE"));
        assert_eq!(split_line(&mut pending), None);
        assert_eq!(pending, b"PART");
    }

    #[test]
    fn usb_detection_falls_back_to_name() {
        assert!(is_usb("/dev/ttyUSB0", &SerialPortType::Unknown));
        assert!(is_usb("/dev/ttyACM1", &SerialPortType::Unknown));
        assert!(!is_usb("/dev/ttyS0", &SerialPortType::PciPort));
    }
}
