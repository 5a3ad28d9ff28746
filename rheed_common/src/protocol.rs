//! Line protocol between the beam controller and the host.
//!
//! Every message is one line of plain text. Fixed tags identify the message
//! purpose; two messages carry a payload (the bare exposure integer and the
//! `PWD:` secret).
//!
//! | Direction | Tag | Meaning |
//! |---|---|---|
//! | host → controller | `MARCO!` | connection probe |
//! | controller → host | `POLO!` | probe acknowledgement |
//! | host → controller | `PULSE` | liveness heartbeat |
//! | controller → host | `<integer>` | exposure seconds |
//! | controller → host | `BEAM_ON` / `BEAM_OFF` | beam state change |
//! | controller → host | `VERIFY` / `PROCEED` / `REDO` | image verification |
//! | host → controller | `READY` | image displayed |
//! | controller → host | `PASSWORD` / `INCORRECT` | lockout secret request |
//! | host → controller | `PWD:<secret>` | submitted secret |
//! | controller → host | `CRITICAL` / `HANG` | safety notices |
//! | either | `STOP` | operator abort |

use std::fmt;
use thiserror::Error;

use crate::consts::SECRET_PREFIX;

/// Which side of the link originates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the host, consumed by the controller.
    HostToController,
    /// Sent by the controller, consumed by the host.
    ControllerToHost,
    /// Accepted in both directions.
    Both,
}

/// One protocol message.
#[derive(Clone, PartialEq, Eq)]
pub enum Message {
    /// `MARCO!` connection probe.
    Marco,
    /// `POLO!` probe acknowledgement.
    Polo,
    /// `PULSE` heartbeat.
    Pulse,
    /// Current cumulative beam-on seconds.
    Exposure(u32),
    /// Beam unblanked.
    BeamOn,
    /// Beam blanked.
    BeamOff,
    /// Operator image verification requested.
    Verify,
    /// Verification accepted.
    Proceed,
    /// Verification rejected, retaking.
    Redo,
    /// Image displayed on the host.
    Ready,
    /// Lockout: secret requested.
    Password,
    /// Lockout: last secret was wrong.
    Incorrect,
    /// Submitted secret.
    Secret(String),
    /// Exposure ratchet engaged, entering lockout.
    Critical,
    /// Unreachable state recovered.
    Hang,
    /// Operator abort.
    Stop,
}

/// Error returned when a line cannot be classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Line was blank after trimming.
    #[error("empty line")]
    Empty,
    /// Line did not start with a known tag.
    #[error("unknown tag: {0:?}")]
    UnknownTag(String),
    /// Numeric payload out of range.
    #[error("invalid payload for {tag}: {detail}")]
    InvalidPayload { tag: &'static str, detail: String },
}

impl Message {
    /// Fixed tag text (payload-carrying messages return their tag only).
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Marco => "MARCO!",
            Self::Polo => "POLO!",
            Self::Pulse => "PULSE",
            Self::Exposure(_) => "<integer>",
            Self::BeamOn => "BEAM_ON",
            Self::BeamOff => "BEAM_OFF",
            Self::Verify => "VERIFY",
            Self::Proceed => "PROCEED",
            Self::Redo => "REDO",
            Self::Ready => "READY",
            Self::Password => "PASSWORD",
            Self::Incorrect => "INCORRECT",
            Self::Secret(_) => SECRET_PREFIX,
            Self::Critical => "CRITICAL",
            Self::Hang => "HANG",
            Self::Stop => "STOP",
        }
    }

    /// Originating side of this message.
    pub const fn direction(&self) -> Direction {
        match self {
            Self::Marco | Self::Pulse | Self::Ready | Self::Secret(_) => {
                Direction::HostToController
            }
            Self::Stop => Direction::Both,
            _ => Direction::ControllerToHost,
        }
    }

    /// Encode as a single line without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Self::Exposure(seconds) => seconds.to_string(),
            Self::Secret(secret) => format!("{SECRET_PREFIX}{secret}"),
            other => other.tag().to_string(),
        }
    }

    /// Classify one received line.
    ///
    /// Surrounding whitespace (including `\r`) is ignored. Tags are matched as
    /// prefixes so trailing noise after a fixed token is tolerated; the secret
    /// keeps everything after `PWD:` up to the line terminator verbatim.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(secret) = line.trim_start().strip_prefix(SECRET_PREFIX) {
            return Ok(Self::Secret(secret.to_string()));
        }

        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        if line.bytes().all(|b| b.is_ascii_digit()) {
            return line
                .parse::<u32>()
                .map(Self::Exposure)
                .map_err(|e| ProtocolError::InvalidPayload {
                    tag: "<integer>",
                    detail: e.to_string(),
                });
        }

        const FIXED: [Message; 14] = [
            Message::Marco,
            Message::Polo,
            Message::Pulse,
            Message::BeamOn,
            Message::BeamOff,
            Message::Verify,
            Message::Proceed,
            Message::Redo,
            Message::Ready,
            Message::Password,
            Message::Incorrect,
            Message::Critical,
            Message::Hang,
            Message::Stop,
        ];

        FIXED
            .iter()
            .find(|m| line.starts_with(m.tag()))
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownTag(line.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never print the secret itself.
            Self::Secret(_) => write!(f, "{SECRET_PREFIX}<redacted>"),
            other => f.write_str(&other.encode()),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_tags() {
        assert_eq!(Message::parse("MARCO!"), Ok(Message::Marco));
        assert_eq!(Message::parse("POLO!\r\n"), Ok(Message::Polo));
        assert_eq!(Message::parse("  PULSE "), Ok(Message::Pulse));
        assert_eq!(Message::parse("BEAM_OFF"), Ok(Message::BeamOff));
        assert_eq!(Message::parse("CRITICAL"), Ok(Message::Critical));
    }

    #[test]
    fn beam_on_is_not_mistaken_for_beam_off() {
        assert_eq!(Message::parse("BEAM_ON"), Ok(Message::BeamOn));
    }

    #[test]
    fn parses_exposure_integer() {
        assert_eq!(Message::parse("570"), Ok(Message::Exposure(570)));
        assert_eq!(Message::parse("0"), Ok(Message::Exposure(0)));
    }

    #[test]
    fn overflowing_integer_is_invalid_payload() {
        assert!(matches!(
            Message::parse("99999999999999"),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn secret_keeps_payload_verbatim() {
        assert_eq!(
            Message::parse("PWD:hunter 2"),
            Ok(Message::Secret("hunter 2".into()))
        );
        assert_eq!(Message::parse("PWD:"), Ok(Message::Secret(String::new())));
    }

    #[test]
    fn secret_keeps_trailing_whitespace() {
        assert_eq!(
            Message::parse("PWD:abc  \r\n"),
            Ok(Message::Secret("abc  ".into()))
        );
        assert_eq!(
            Message::parse("PWD:\tx \n"),
            Ok(Message::Secret("\tx ".into()))
        );
        assert_eq!(Message::parse("PWD: \r"), Ok(Message::Secret(" ".into())));
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert_eq!(Message::parse("   "), Err(ProtocolError::Empty));
        assert!(matches!(
            Message::parse("HELLO"),
            Err(ProtocolError::UnknownTag(_))
        ));
    }

    #[test]
    fn encode_payload_messages() {
        assert_eq!(Message::Exposure(42).encode(), "42");
        assert_eq!(Message::Secret("abc".into()).encode(), "PWD:abc");
        assert_eq!(Message::Verify.encode(), "VERIFY");
    }

    #[test]
    fn display_redacts_secret() {
        let shown = format!("{:?}", Message::Secret("abc".into()));
        assert!(!shown.contains("abc"));
    }

    #[test]
    fn directions_follow_table() {
        assert_eq!(Message::Marco.direction(), Direction::HostToController);
        assert_eq!(Message::Polo.direction(), Direction::ControllerToHost);
        assert_eq!(Message::Ready.direction(), Direction::HostToController);
        assert_eq!(Message::Exposure(1).direction(), Direction::ControllerToHost);
        assert_eq!(Message::Stop.direction(), Direction::Both);
    }
}
