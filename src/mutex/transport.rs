//! Transport contract and the in-process channel transport.
//!
//! The mutex core is generic over [`Transport`]: a connection-oriented,
//! reliable, in-order-per-peer channel that delivers encoded frames with
//! transport-level sender attribution, plus a notification when a peer's
//! connection terminates. [`ChannelHub`] wires a fixed set of identities
//! together over crossbeam channels; it is the in-process implementation
//! used by the tests and the chaos harness, and frames travel through it
//! encoded so every exchange exercises the wire codec.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::peer::PeerIdentity;

/// An inbound event delivered by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An encoded frame from a connected peer. `from` is the identity the
    /// peer's connection is registered under, used to attribute `Grant` and
    /// `Deny` answers that carry only their target in the payload.
    Message { from: PeerIdentity, frame: Vec<u8> },

    /// A peer's connection terminated.
    PeerLost { peer: PeerIdentity },
}

/// The capability the mutex core consumes.
pub trait Transport {
    /// Send an encoded frame to a peer.
    ///
    /// Returns false when the peer is unknown or its connection is down;
    /// delivery is otherwise reliable and in-order per peer.
    fn send(&mut self, peer: PeerIdentity, frame: Vec<u8>) -> bool;

    /// Poll one inbound event without blocking.
    fn poll(&mut self) -> Option<TransportEvent>;

    /// Identity of the local end, used by the identity-deriving
    /// constructor.
    fn local_identity(&self) -> PeerIdentity;
}

/// Hub connecting a fixed set of identities with per-pair connections.
pub struct ChannelHub {
    /// Senders into each identity's inbox.
    senders: HashMap<PeerIdentity, Sender<TransportEvent>>,
    /// Receivers for each inbox, taken when the endpoint is created.
    receivers: HashMap<PeerIdentity, Receiver<TransportEvent>>,
    /// Directional connection flags, keyed by (from, to).
    links: HashMap<(PeerIdentity, PeerIdentity), Arc<AtomicBool>>,
}

impl ChannelHub {
    /// Create a hub over a fixed identity set, all pairs connected.
    pub fn new(identities: &[PeerIdentity]) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        let mut links = HashMap::new();

        for &id in identities {
            let (tx, rx) = unbounded();
            senders.insert(id, tx);
            receivers.insert(id, rx);
        }

        for &from in identities {
            for &to in identities {
                if from != to {
                    links.insert((from, to), Arc::new(AtomicBool::new(true)));
                }
            }
        }

        ChannelHub {
            senders,
            receivers,
            links,
        }
    }

    /// Take the endpoint for `identity`.
    ///
    /// Consumes the identity's receiver, so each endpoint can be taken only
    /// once.
    pub fn endpoint(&mut self, identity: PeerIdentity) -> Option<ChannelTransport> {
        let rx = self.receivers.remove(&identity)?;

        let mut tx_map = HashMap::new();
        for (&id, tx) in &self.senders {
            if id != identity {
                tx_map.insert(id, tx.clone());
            }
        }

        let mut connected = HashMap::new();
        for (&(from, to), flag) in &self.links {
            if from == identity {
                connected.insert(to, flag.clone());
            }
        }

        Some(ChannelTransport {
            identity,
            rx,
            tx_map,
            connected,
        })
    }

    /// Sever the pair `(a, b)` in both directions.
    ///
    /// Both inboxes receive a `PeerLost` for the other end, queued behind
    /// any frames already in flight so arrival order is preserved.
    pub fn disconnect(&self, a: PeerIdentity, b: PeerIdentity) {
        let mut was_connected = false;
        for key in [(a, b), (b, a)] {
            if let Some(flag) = self.links.get(&key) {
                was_connected |= flag.swap(false, Ordering::SeqCst);
            }
        }
        if !was_connected {
            return;
        }
        if let Some(tx) = self.senders.get(&a) {
            let _ = tx.send(TransportEvent::PeerLost { peer: b });
        }
        if let Some(tx) = self.senders.get(&b) {
            let _ = tx.send(TransportEvent::PeerLost { peer: a });
        }
    }

    /// Sever every pair involving `identity`, as when its process dies.
    pub fn kill(&self, identity: PeerIdentity) {
        for &other in self.senders.keys() {
            if other != identity {
                self.disconnect(identity, other);
            }
        }
    }

    pub fn is_connected(&self, from: PeerIdentity, to: PeerIdentity) -> bool {
        self.links
            .get(&(from, to))
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// One identity's end of a [`ChannelHub`].
pub struct ChannelTransport {
    identity: PeerIdentity,
    rx: Receiver<TransportEvent>,
    tx_map: HashMap<PeerIdentity, Sender<TransportEvent>>,
    connected: HashMap<PeerIdentity, Arc<AtomicBool>>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, peer: PeerIdentity, frame: Vec<u8>) -> bool {
        match self.connected.get(&peer) {
            Some(flag) if flag.load(Ordering::SeqCst) => {}
            _ => return false,
        }
        match self.tx_map.get(&peer) {
            Some(tx) => tx
                .send(TransportEvent::Message {
                    from: self.identity,
                    frame,
                })
                .is_ok(),
            None => false,
        }
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    fn local_identity(&self) -> PeerIdentity {
        self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ident(last_octet: u8) -> PeerIdentity {
        PeerIdentity::new(Ipv4Addr::new(10, 0, 0, last_octet), 4400)
    }

    #[test]
    fn test_hub_delivers_with_attribution() {
        let ids = [ident(1), ident(2)];
        let mut hub = ChannelHub::new(&ids);
        let mut a = hub.endpoint(ids[0]).unwrap();
        let mut b = hub.endpoint(ids[1]).unwrap();

        assert!(a.send(ids[1], vec![1, 2, 3]));
        match b.poll() {
            Some(TransportEvent::Message { from, frame }) => {
                assert_eq!(from, ids[0]);
                assert_eq!(frame, vec![1, 2, 3]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(b.poll().is_none());
    }

    #[test]
    fn test_disconnect_notifies_both_sides_once() {
        let ids = [ident(1), ident(2), ident(3)];
        let mut hub = ChannelHub::new(&ids);
        let mut a = hub.endpoint(ids[0]).unwrap();
        let mut b = hub.endpoint(ids[1]).unwrap();

        hub.disconnect(ids[0], ids[1]);
        hub.disconnect(ids[0], ids[1]); // second call is a no-op

        assert!(!a.send(ids[1], vec![0]));
        assert!(!hub.is_connected(ids[0], ids[1]));
        assert!(hub.is_connected(ids[0], ids[2]));

        assert!(matches!(
            a.poll(),
            Some(TransportEvent::PeerLost { peer }) if peer == ids[1]
        ));
        assert!(a.poll().is_none());
        assert!(matches!(
            b.poll(),
            Some(TransportEvent::PeerLost { peer }) if peer == ids[0]
        ));
        assert!(b.poll().is_none());
    }

    #[test]
    fn test_peer_lost_queues_behind_frames_in_flight() {
        let ids = [ident(1), ident(2)];
        let mut hub = ChannelHub::new(&ids);
        let mut a = hub.endpoint(ids[0]).unwrap();
        let mut b = hub.endpoint(ids[1]).unwrap();

        assert!(a.send(ids[1], vec![7]));
        hub.kill(ids[0]);

        assert!(matches!(b.poll(), Some(TransportEvent::Message { .. })));
        assert!(matches!(b.poll(), Some(TransportEvent::PeerLost { .. })));
    }
}
