//! Wire format constants and header/command decoding.
//!
//! Every MDP message carries a protocol header frame right after the routing
//! frames:
//! ```text
//! client  -> broker : ["MDPC01", service, body...]
//! broker  -> client : ["MDPC01", service, body...]
//! worker <-> broker : ["", "MDPW01", command, payload...]
//! ```
//!
//! The worker command is a single byte.

use std::fmt;

use crate::error::{MdpError, Result};

/// Header frame of the client sub-protocol.
pub const MDPC_CLIENT: &[u8] = b"MDPC01";

/// Header frame of the worker sub-protocol.
pub const MDPW_WORKER: &[u8] = b"MDPW01";

/// Service-name prefix reserved for the broker's internal services.
pub const MMI_PREFIX: &str = "mmi.";

/// Internal service answering "does this service have workers?".
pub const MMI_SERVICE: &str = "mmi.service";

/// Status codes returned by the internal services.
pub mod mmi_status {
    /// The service exists and has at least one worker.
    pub const OK: &[u8] = b"200";
    /// The service is unknown or has no workers.
    pub const NOT_FOUND: &[u8] = b"404";
    /// The internal service is not implemented.
    pub const NOT_IMPLEMENTED: &[u8] = b"501";
}

/// Whether `name` addresses the broker's internal services.
#[inline]
pub fn is_mmi(name: &str) -> bool {
    name.starts_with(MMI_PREFIX)
}

/// Sub-protocol selected by the header frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// `MDPC01`
    Client,
    /// `MDPW01`
    Worker,
}

impl Header {
    /// Decode a header frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        match frame {
            MDPC_CLIENT => Ok(Header::Client),
            MDPW_WORKER => Ok(Header::Worker),
            other => Err(MdpError::Protocol(format!(
                "Invalid header: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// The header frame bytes.
    pub fn as_frame(self) -> &'static [u8] {
        match self {
            Header::Client => MDPC_CLIENT,
            Header::Worker => MDPW_WORKER,
        }
    }
}

/// Worker sub-protocol command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Worker registers for a service. Payload: `[service]`.
    Ready = 1,
    /// Broker hands out work. Payload: `[client, "", body...]`.
    Request = 2,
    /// Worker answers. Payload: `[client, "", body...]`.
    Reply = 3,
    /// Either side signals liveness. No payload.
    Heartbeat = 4,
    /// Either side ends the session. No payload.
    Disconnect = 5,
}

impl Command {
    /// Decode a command frame; must be exactly one known byte.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        match frame {
            [1] => Ok(Command::Ready),
            [2] => Ok(Command::Request),
            [3] => Ok(Command::Reply),
            [4] => Ok(Command::Heartbeat),
            [5] => Ok(Command::Disconnect),
            other => Err(MdpError::Protocol(format!(
                "Invalid command: 0x{}",
                hex::encode_upper(other)
            ))),
        }
    }

    /// The command byte.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Ready => "READY",
            Command::Request => "REQUEST",
            Command::Reply => "REPLY",
            Command::Heartbeat => "HEARTBEAT",
            Command::Disconnect => "DISCONNECT",
        };
        f.write_str(name)
    }
}

/// Decode a service-name frame. Names must be UTF-8.
pub fn decode_service(frame: &[u8]) -> Result<String> {
    String::from_utf8(frame.to_vec())
        .map_err(|_| MdpError::protocol("Service name is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_decode() {
        assert_eq!(Header::decode(b"MDPC01").unwrap(), Header::Client);
        assert_eq!(Header::decode(b"MDPW01").unwrap(), Header::Worker);
        assert!(Header::decode(b"MDPW02").is_err());
        assert!(Header::decode(b"").is_err());
    }

    #[test]
    fn test_header_as_frame() {
        assert_eq!(Header::Client.as_frame(), b"MDPC01");
        assert_eq!(Header::Worker.as_frame(), b"MDPW01");
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(Command::Ready.as_byte(), 1);
        assert_eq!(Command::Request.as_byte(), 2);
        assert_eq!(Command::Reply.as_byte(), 3);
        assert_eq!(Command::Heartbeat.as_byte(), 4);
        assert_eq!(Command::Disconnect.as_byte(), 5);

        for byte in 1u8..=5 {
            assert_eq!(Command::decode(&[byte]).unwrap().as_byte(), byte);
        }
    }

    #[test]
    fn test_command_decode_rejects_unknown() {
        assert!(Command::decode(&[0]).is_err());
        assert!(Command::decode(&[6]).is_err());
        assert!(Command::decode(&[]).is_err());
        assert!(Command::decode(&[1, 1]).is_err());
    }

    #[test]
    fn test_is_mmi() {
        assert!(is_mmi("mmi.service"));
        assert!(is_mmi("mmi.bogus"));
        assert!(!is_mmi("mmi"));
        assert!(!is_mmi("echo"));
    }

    #[test]
    fn test_decode_service() {
        assert_eq!(decode_service(b"echo").unwrap(), "echo");
        assert!(decode_service(&[0xff, 0xfe]).is_err());
    }
}
