//! Peer identity and the peer table with per-request grant tracking.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use super::errors::MutexError;

/// Coordination identity of a mutex instance: its IPv4 address and port.
///
/// Identities must be unique across peers. Their only protocol role beyond
/// attribution is deterministic tiebreaking: the derived ordering compares
/// `(ip, port)` lexicographically as unsigned values, and the smaller tuple
/// wins a simultaneous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    ip: u32,
    port: u16,
}

impl PeerIdentity {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        PeerIdentity {
            ip: u32::from(ip),
            port,
        }
    }

    /// Build from the raw 32-bit address value, as carried on the wire.
    #[inline]
    pub fn from_parts(ip: u32, port: u16) -> Self {
        PeerIdentity { ip, port }
    }

    /// Resolve a `"host:port"` station address to an IPv4 identity.
    ///
    /// Hosts that do not resolve, or resolve only to IPv6, are configuration
    /// errors.
    pub fn resolve(addr: &str) -> Result<Self, MutexError> {
        let resolved = addr.to_socket_addrs().map_err(|_| MutexError::Unresolvable {
            addr: addr.to_owned(),
        })?;
        let v4 = resolved
            .into_iter()
            .find_map(|sa| match sa {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| MutexError::Unresolvable {
                addr: addr.to_owned(),
            })?;
        Ok(PeerIdentity::new(*v4.ip(), v4.port()))
    }

    /// The 32-bit address value, network byte order when serialized.
    #[inline]
    pub fn ip(&self) -> u32 {
        self.ip
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ipv4(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ipv4(), self.port)
    }
}

/// One peer known to the mutex.
#[derive(Debug, Clone)]
struct PeerRecord {
    identity: PeerIdentity,
    /// Whether this peer's `Grant` has been counted for the current request
    /// episode. Meaningless outside the Requesting state.
    granted: bool,
}

/// The table of peers sharing the lock, with per-episode grant tracking.
///
/// Append-only while the lock is in play: entries are added before use and
/// removed only when the transport reports a peer lost. Indices are not
/// exposed; peers are addressed by identity throughout, so the table may
/// resize without invalidating grant state.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Vec<PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable { peers: Vec::new() }
    }

    /// Append a peer. Duplicate identities are rejected.
    pub fn add(&mut self, identity: PeerIdentity) -> Result<(), MutexError> {
        if self.contains(identity) {
            return Err(MutexError::DuplicatePeer { peer: identity });
        }
        self.peers.push(PeerRecord {
            identity,
            granted: false,
        });
        Ok(())
    }

    /// Remove a lost peer. Returns false if the identity was unknown.
    pub fn remove(&mut self, identity: PeerIdentity) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.identity != identity);
        self.peers.len() != before
    }

    pub fn contains(&self, identity: PeerIdentity) -> bool {
        self.peers.iter().any(|p| p.identity == identity)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = PeerIdentity> + '_ {
        self.peers.iter().map(|p| p.identity)
    }

    /// Clear every grant flag at the start of a request episode.
    pub fn begin_request(&mut self) {
        for peer in &mut self.peers {
            peer.granted = false;
        }
    }

    /// Count a `Grant` from `from` toward the current episode.
    ///
    /// Returns true if the flag newly flipped; false for unknown peers and
    /// for grants already counted.
    pub fn record_grant(&mut self, from: PeerIdentity) -> bool {
        match self.peers.iter_mut().find(|p| p.identity == from) {
            Some(peer) if !peer.granted => {
                peer.granted = true;
                true
            }
            _ => false,
        }
    }

    /// Number of peers that have granted the current episode.
    #[inline]
    pub fn grant_count(&self) -> usize {
        self.peers.iter().filter(|p| p.granted).count()
    }

    /// Unanimity check: every peer has granted. Trivially true with no
    /// peers, which is what makes the single-instance case self-granting.
    #[inline]
    pub fn all_granted(&self) -> bool {
        self.grant_count() == self.peers.len()
    }

    pub fn has_granted(&self, identity: PeerIdentity) -> bool {
        self.peers
            .iter()
            .any(|p| p.identity == identity && p.granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(last_octet: u8, port: u16) -> PeerIdentity {
        PeerIdentity::new(Ipv4Addr::new(10, 0, 0, last_octet), port)
    }

    #[test]
    fn test_tiebreak_order_ip_dominates_port() {
        let low_ip = PeerIdentity::new(Ipv4Addr::new(1, 2, 3, 4), 9000);
        let high_ip = PeerIdentity::new(Ipv4Addr::new(5, 6, 7, 8), 100);
        assert!(low_ip < high_ip);

        let same_ip_low_port = PeerIdentity::new(Ipv4Addr::new(1, 2, 3, 4), 100);
        assert!(same_ip_low_port < low_ip);
    }

    #[test]
    fn test_resolve_literal_address() {
        let id = PeerIdentity::resolve("192.168.1.7:3883").unwrap();
        assert_eq!(id.ipv4(), Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(id.port(), 3883);
        assert_eq!(id.to_string(), "192.168.1.7:3883");
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        assert!(matches!(
            PeerIdentity::resolve("not an address"),
            Err(MutexError::Unresolvable { .. })
        ));
    }

    #[test]
    fn test_duplicate_peer_rejected() {
        let mut table = PeerTable::new();
        table.add(ident(1, 100)).unwrap();
        assert!(matches!(
            table.add(ident(1, 100)),
            Err(MutexError::DuplicatePeer { .. })
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_grant_tracking_unanimity() {
        let mut table = PeerTable::new();
        assert!(table.all_granted()); // empty table: trivially unanimous

        table.add(ident(1, 100)).unwrap();
        table.add(ident(2, 200)).unwrap();
        table.begin_request();
        assert!(!table.all_granted());

        assert!(table.record_grant(ident(1, 100)));
        assert!(!table.record_grant(ident(1, 100))); // double grant not recounted
        assert!(!table.record_grant(ident(9, 900))); // unknown peer
        assert_eq!(table.grant_count(), 1);

        assert!(table.record_grant(ident(2, 200)));
        assert!(table.all_granted());

        // A new episode starts clean.
        table.begin_request();
        assert_eq!(table.grant_count(), 0);
        assert!(!table.has_granted(ident(1, 100)));
    }
}
