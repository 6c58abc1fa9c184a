use std::fmt;

/// Framing violations found while decoding an inbound frame.
///
/// The transport is assumed reliable, so any of these indicates a
/// misbehaving peer or a foreign protocol on the channel. The offending
/// frame is dropped; the error is surfaced to the caller of `pump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame ended before the advertised fields were complete.
    Truncated { expected: usize, got: usize },

    /// Unknown message kind tag.
    UnknownKind(u8),

    /// The name length field was zero.
    EmptyName,

    /// The name bytes were not valid UTF-8.
    MalformedName,

    /// The port field exceeds the 16-bit range.
    PortOutOfRange(u32),

    /// Bytes remained after the last field.
    TrailingBytes { extra: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { expected, got } => {
                write!(f, "truncated frame: expected {} bytes, got {}", expected, got)
            }
            DecodeError::UnknownKind(tag) => {
                write!(f, "unknown message kind tag {:#04x}", tag)
            }
            DecodeError::EmptyName => {
                write!(f, "frame carries an empty mutex name")
            }
            DecodeError::MalformedName => {
                write!(f, "mutex name is not valid UTF-8")
            }
            DecodeError::PortOutOfRange(value) => {
                write!(f, "port field {} exceeds 65535", value)
            }
            DecodeError::TrailingBytes { extra } => {
                write!(f, "{} trailing bytes after the last field", extra)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
