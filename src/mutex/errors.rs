use std::fmt;

use crate::wire::errors::DecodeError;

use super::peer::PeerIdentity;

/// Errors reported synchronously to callers of mutex operations.
///
/// Transient contention is not an error; it surfaces through the denied
/// callbacks. These are configuration mistakes and wire-level faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexError {
    /// The peer set may only change while the lock is available.
    Busy,

    /// The peer is already in the table.
    DuplicatePeer { peer: PeerIdentity },

    /// The station address did not resolve to an IPv4 endpoint.
    Unresolvable { addr: String },

    /// The address resolves to this instance's own identity. Identities
    /// must be unique across peers or the tiebreak order collapses.
    IdentityCollision { identity: PeerIdentity },

    /// Mutex names must be 1..=255 bytes to fit the wire name tag.
    InvalidName { len: usize },

    /// A malformed frame arrived during `pump` and was dropped.
    Decode(DecodeError),
}

impl fmt::Display for MutexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutexError::Busy => {
                write!(f, "peer table is locked while the mutex is held or requested")
            }
            MutexError::DuplicatePeer { peer } => {
                write!(f, "peer {} is already registered", peer)
            }
            MutexError::Unresolvable { addr } => {
                write!(f, "cannot resolve '{}' to an IPv4 endpoint", addr)
            }
            MutexError::IdentityCollision { identity } => {
                write!(f, "peer identity {} collides with our own", identity)
            }
            MutexError::InvalidName { len } => {
                write!(f, "mutex name length {} is outside 1..=255", len)
            }
            MutexError::Decode(err) => {
                write!(f, "malformed frame dropped: {}", err)
            }
        }
    }
}

impl std::error::Error for MutexError {}

impl From<DecodeError> for MutexError {
    fn from(err: DecodeError) -> Self {
        MutexError::Decode(err)
    }
}
