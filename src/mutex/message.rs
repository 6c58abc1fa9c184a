//! Typed lock protocol messages.

use serde::{Deserialize, Serialize};

use crate::wire::format::kind;

use super::peer::PeerIdentity;

/// The four arbitration messages exchanged between peers.
///
/// `Request` and `Release` identify their sender; `Grant` and `Deny` name
/// the requester they answer, so a response to a request that has since
/// been cancelled is recognizably stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMessage {
    /// Ask every peer for the lock.
    Request { sender: PeerIdentity },

    /// Yield the lock to the named requester.
    Grant { target: PeerIdentity },

    /// Refuse the lock to the named requester.
    Deny { target: PeerIdentity },

    /// Announce that the sender no longer wants or holds the lock.
    Release { sender: PeerIdentity },
}

impl LockMessage {
    /// Wire kind tag for this message.
    #[inline]
    pub fn kind(&self) -> u8 {
        match self {
            LockMessage::Request { .. } => kind::REQUEST,
            LockMessage::Grant { .. } => kind::GRANT,
            LockMessage::Deny { .. } => kind::DENY,
            LockMessage::Release { .. } => kind::RELEASE,
        }
    }

    /// The identity tuple carried in the payload (sender or target).
    #[inline]
    pub fn identity(&self) -> PeerIdentity {
        match *self {
            LockMessage::Request { sender } => sender,
            LockMessage::Grant { target } => target,
            LockMessage::Deny { target } => target,
            LockMessage::Release { sender } => sender,
        }
    }
}
