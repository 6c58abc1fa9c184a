//! Wire format for lock protocol frames.
//!
//! Every frame is tagged with the mutex name so that independently named
//! mutexes can share one transport without interference. All multi-byte
//! integers are big-endian.
//!
//! # Layout
//!
//! | Offset  | Size | Field                                    |
//! |---------|------|------------------------------------------|
//! | 0       | 1    | message kind tag                         |
//! | 1       | 1    | name length `L` (1..=255)                |
//! | 2       | L    | mutex name, UTF-8                        |
//! | 2 + L   | 4    | IPv4 address of the identity tuple (u32) |
//! | 6 + L   | 4    | port of the identity tuple (u32, <=65535)|
//!
//! `Request` and `Release` carry the sender's identity tuple; `Grant` and
//! `Deny` carry the target's, so that answers to a cancelled request are
//! unambiguously identifiable. Sender attribution for `Grant`/`Deny` comes
//! from the transport, not the payload.

use crate::mutex::message::LockMessage;
use crate::mutex::peer::PeerIdentity;

use super::errors::DecodeError;

/// Message kind tags.
pub mod kind {
    pub const REQUEST: u8 = 1;
    pub const GRANT: u8 = 2;
    pub const DENY: u8 = 3;
    pub const RELEASE: u8 = 4;
}

/// Fixed bytes before the name: kind tag plus name length.
pub const PREFIX_SIZE: usize = 2;

/// Identity payload: two u32 fields.
pub const PAYLOAD_SIZE: usize = 8;

/// Longest mutex name the one-byte length field can carry.
pub const MAX_NAME_LEN: usize = 255;

/// A decoded frame: the mutex name it addresses plus the typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub message: LockMessage,
}

/// Encode a message into a framed byte vector.
///
/// Mutex construction enforces the name bounds, so encoding never fails for
/// a name that reached this point.
pub fn encode_frame(name: &str, message: &LockMessage) -> Vec<u8> {
    debug_assert!(!name.is_empty() && name.len() <= MAX_NAME_LEN);

    let identity = message.identity();
    let mut buf = Vec::with_capacity(PREFIX_SIZE + name.len() + PAYLOAD_SIZE);
    buf.push(message.kind());
    buf.push(name.len() as u8);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&identity.ip().to_be_bytes());
    buf.extend_from_slice(&u32::from(identity.port()).to_be_bytes());
    buf
}

/// Decode a framed byte slice.
///
/// Strict: short frames, unknown tags, malformed names, out-of-range ports,
/// and trailing bytes are all rejected.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.len() < PREFIX_SIZE {
        return Err(DecodeError::Truncated {
            expected: PREFIX_SIZE,
            got: bytes.len(),
        });
    }

    let build: fn(PeerIdentity) -> LockMessage = match bytes[0] {
        kind::REQUEST => |id| LockMessage::Request { sender: id },
        kind::GRANT => |id| LockMessage::Grant { target: id },
        kind::DENY => |id| LockMessage::Deny { target: id },
        kind::RELEASE => |id| LockMessage::Release { sender: id },
        other => return Err(DecodeError::UnknownKind(other)),
    };

    let name_len = bytes[1] as usize;
    if name_len == 0 {
        return Err(DecodeError::EmptyName);
    }

    let expected = PREFIX_SIZE + name_len + PAYLOAD_SIZE;
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            got: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(DecodeError::TrailingBytes {
            extra: bytes.len() - expected,
        });
    }

    let name = std::str::from_utf8(&bytes[PREFIX_SIZE..PREFIX_SIZE + name_len])
        .map_err(|_| DecodeError::MalformedName)?
        .to_owned();

    let at = PREFIX_SIZE + name_len;
    let ip = u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let port = u32::from_be_bytes([bytes[at + 4], bytes[at + 5], bytes[at + 6], bytes[at + 7]]);
    if port > u16::MAX as u32 {
        return Err(DecodeError::PortOutOfRange(port));
    }

    Ok(Frame {
        name,
        message: build(PeerIdentity::from_parts(ip, port as u16)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ident(port: u16) -> PeerIdentity {
        PeerIdentity::new(Ipv4Addr::new(1, 2, 3, 4), port)
    }

    #[test]
    fn test_request_frame_round_trip() {
        let msg = LockMessage::Request { sender: ident(100) };
        let frame = encode_frame("printer", &msg);
        assert_eq!(frame[0], kind::REQUEST);
        assert_eq!(frame[1] as usize, "printer".len());

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.name, "printer");
        assert_eq!(decoded.message, msg);
    }

    #[test]
    fn test_grant_carries_target() {
        let msg = LockMessage::Grant { target: ident(9000) };
        let frame = encode_frame("m", &msg);
        // Identity fields sit right after the one-byte name.
        assert_eq!(&frame[3..7], &0x01020304u32.to_be_bytes());
        assert_eq!(&frame[7..11], &9000u32.to_be_bytes());
        assert_eq!(decode_frame(&frame).unwrap().message, msg);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = encode_frame("m", &LockMessage::Release { sender: ident(1) });
        let err = decode_frame(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
        assert!(matches!(
            decode_frame(&[]).unwrap_err(),
            DecodeError::Truncated { .. }
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut frame = encode_frame("m", &LockMessage::Deny { target: ident(1) });
        frame[0] = 0x7f;
        assert_eq!(decode_frame(&frame).unwrap_err(), DecodeError::UnknownKind(0x7f));
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        let mut frame = encode_frame("m", &LockMessage::Request { sender: ident(1) });
        let at = frame.len() - 4;
        frame[at..].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        assert_eq!(
            decode_frame(&frame).unwrap_err(),
            DecodeError::PortOutOfRange(0x0001_0000)
        );
    }

    #[test]
    fn test_name_violations_rejected() {
        let mut frame = encode_frame("ab", &LockMessage::Request { sender: ident(1) });
        frame[2] = 0xff; // invalid UTF-8 lead byte
        assert_eq!(decode_frame(&frame).unwrap_err(), DecodeError::MalformedName);

        let mut empty = encode_frame("x", &LockMessage::Request { sender: ident(1) });
        empty[1] = 0;
        assert_eq!(decode_frame(&empty).unwrap_err(), DecodeError::EmptyName);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = encode_frame("m", &LockMessage::Request { sender: ident(1) });
        frame.push(0);
        assert_eq!(
            decode_frame(&frame).unwrap_err(),
            DecodeError::TrailingBytes { extra: 1 }
        );
    }
}
