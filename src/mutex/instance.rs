//! The distributed mutex instance: one peer's replica of the lock.
//!
//! Every participating process constructs an instance with the same name
//! and the same peer set. Requesting the lock broadcasts `Request` to every
//! peer and waits for a unanimous `Grant`; a single `Deny` aborts the
//! request. Two peers requesting simultaneously each see the other's
//! `Request` while requesting themselves, and the conflict is resolved by
//! identity order: the smaller `(ip, port)` tuple wins, the loser grants
//! and reports a local denial. One round of messages, no retries.
//!
//! All transitions happen synchronously inside `request`, `release`,
//! `add_peer`, or `pump`; there is no internal thread. User callbacks fire
//! only at the end of `pump`.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::wire::format::{self, Frame, MAX_NAME_LEN};

use super::callbacks::{CallbackRegistry, LockEvent};
use super::errors::MutexError;
use super::message::LockMessage;
use super::peer::{PeerIdentity, PeerTable};
use super::transport::{Transport, TransportEvent};

/// Local view of the distributed lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// Nobody is known to hold the lock.
    Available,
    /// We sent a `Request` and are awaiting an answer from every peer.
    Requesting,
    /// We hold the lock.
    Ours,
    /// We granted the lock to a peer and are awaiting its `Release`.
    HeldRemotely,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockState::Available => "available",
            LockState::Requesting => "requesting",
            LockState::Ours => "ours",
            LockState::HeldRemotely => "held-remotely",
        };
        f.write_str(name)
    }
}

/// One peer's replica of a named distributed lock.
///
/// Operations are non-blocking; their user-visible effects (callbacks,
/// remote reactions) materialize across subsequent calls to [`pump`].
///
/// [`pump`]: DistributedMutex::pump
pub struct DistributedMutex<T: Transport> {
    name: String,
    state: LockState,
    identity: PeerIdentity,
    peers: PeerTable,
    /// Identity of the grantee while the lock is held remotely. Used to
    /// recognize the matching `Release` and to refuse everyone else.
    holder: Option<PeerIdentity>,
    transport: T,
    callbacks: CallbackRegistry,
    /// Events scheduled to fire at the end of the current or next pump.
    pending: Vec<LockEvent>,
}

impl<T: Transport> DistributedMutex<T> {
    /// Construct an instance with an explicit coordination identity.
    ///
    /// The identity must be unique across all peers sharing the name; it
    /// feeds the tiebreak order. The name must fit the wire name tag
    /// (1..=255 bytes).
    pub fn new(name: &str, identity: PeerIdentity, transport: T) -> Result<Self, MutexError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(MutexError::InvalidName { len: name.len() });
        }
        Ok(DistributedMutex {
            name: name.to_owned(),
            state: LockState::Available,
            identity,
            peers: PeerTable::new(),
            holder: None,
            transport,
            callbacks: CallbackRegistry::new(),
            pending: Vec::new(),
        })
    }

    /// Construct an instance that reuses a transport, taking the
    /// transport's local identity as its own.
    ///
    /// Only safe for a single mutex per transport: a second mutex deriving
    /// the same identity would collide in the tiebreak order. Prefer
    /// [`new`](DistributedMutex::new) with an explicit identity.
    pub fn from_transport(name: &str, transport: T) -> Result<Self, MutexError> {
        let identity = transport.local_identity();
        DistributedMutex::new(name, identity, transport)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[inline]
    pub fn state(&self) -> LockState {
        self.state
    }

    /// True when nobody is known to hold the lock.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.state == LockState::Available
    }

    /// True from when our request is granted until we release.
    #[inline]
    pub fn is_held_locally(&self) -> bool {
        self.state == LockState::Ours
    }

    /// True from when we grant the lock to a peer until its release.
    ///
    /// All three predicates are false while a request of ours is pending.
    #[inline]
    pub fn is_held_remotely(&self) -> bool {
        self.state == LockState::HeldRemotely
    }

    #[inline]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Peers that have granted the currently pending request.
    #[inline]
    pub fn grants_received(&self) -> usize {
        self.peers.grant_count()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    /// The grantee we are waiting on, while the lock is held remotely.
    pub fn holder(&self) -> Option<PeerIdentity> {
        self.holder
    }

    // =========================================================================
    // CALLBACK REGISTRATION
    // =========================================================================

    /// Hook fired when our request is granted.
    pub fn on_granted(&mut self, hook: impl FnMut() + 'static) {
        self.callbacks.add_granted(hook);
    }

    /// Hook fired when our request fails, for any reason.
    pub fn on_denied(&mut self, hook: impl FnMut() + 'static) {
        self.callbacks.add_denied(hook);
    }

    /// Hook fired when the lock is released, by us or by the remote holder.
    pub fn on_released(&mut self, hook: impl FnMut() + 'static) {
        self.callbacks.add_released(hook);
    }

    /// Hook fired once if the remote holder vanishes while holding the
    /// lock. Distinct from a release: the lock did not come back.
    pub fn on_holder_lost(&mut self, hook: impl FnMut(PeerIdentity) + 'static) {
        self.callbacks.add_holder_lost(hook);
    }

    // =========================================================================
    // MANIPULATORS
    // =========================================================================

    /// Request the distributed lock.
    ///
    /// If the lock is not available locally the request is refused without
    /// touching the network and the denied hooks fire on the next `pump`.
    pub fn request(&mut self) {
        if self.state != LockState::Available {
            trace!(name = %self.name, state = %self.state, "request refused locally");
            self.pending.push(LockEvent::Denied);
            return;
        }
        self.state = LockState::Requesting;
        self.peers.begin_request();
        self.broadcast(&LockMessage::Request {
            sender: self.identity,
        });
    }

    /// Release the lock, or cancel a pending request.
    ///
    /// Cancelling still notifies every peer: a peer that already granted is
    /// sitting in the held-remotely state and needs the `Release` to
    /// recover. Peers that never saw our request discard it as stale. Does
    /// nothing when we neither hold the lock nor have a request pending.
    pub fn release(&mut self) {
        match self.state {
            LockState::Ours => {
                self.state = LockState::Available;
                self.broadcast(&LockMessage::Release {
                    sender: self.identity,
                });
                self.pending.push(LockEvent::Released);
            }
            LockState::Requesting => {
                self.state = LockState::Available;
                self.broadcast(&LockMessage::Release {
                    sender: self.identity,
                });
                self.pending.push(LockEvent::Denied);
            }
            LockState::Available | LockState::HeldRemotely => {}
        }
    }

    /// Drain inbound traffic, advance the state machine, fire callbacks.
    ///
    /// Messages are handled in arrival order. Malformed frames are dropped
    /// without stopping the drain; the first decode error is returned once
    /// the drain and the callbacks have completed. Returns the number of
    /// transport events handled.
    pub fn pump(&mut self) -> Result<usize, MutexError> {
        let mut handled = 0;
        let mut first_error = None;

        while let Some(event) = self.transport.poll() {
            handled += 1;
            match event {
                TransportEvent::Message { from, frame } => match format::decode_frame(&frame) {
                    Ok(Frame { name, message }) => {
                        if name != self.name {
                            trace!(ours = %self.name, theirs = %name, "frame for other mutex discarded");
                            continue;
                        }
                        self.handle_message(from, message);
                    }
                    Err(err) => {
                        debug!(%err, %from, "malformed frame dropped");
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                },
                TransportEvent::PeerLost { peer } => self.handle_peer_lost(peer),
            }
        }

        self.try_complete_request();
        self.fire_pending();

        match first_error {
            None => Ok(handled),
            Some(err) => Err(MutexError::Decode(err)),
        }
    }

    /// Add a peer by station address (`"host:port"`).
    ///
    /// The peer set may only change while the lock is available, and every
    /// peer must run the same additions or the group is silently
    /// partitioned.
    pub fn add_peer(&mut self, addr: &str) -> Result<(), MutexError> {
        let identity = PeerIdentity::resolve(addr)?;
        self.add_peer_identity(identity)
    }

    /// Add a peer whose address is already resolved.
    pub fn add_peer_identity(&mut self, identity: PeerIdentity) -> Result<(), MutexError> {
        if self.state != LockState::Available {
            return Err(MutexError::Busy);
        }
        if identity == self.identity {
            return Err(MutexError::IdentityCollision { identity });
        }
        self.peers.add(identity)
    }

    // =========================================================================
    // INBOUND HANDLERS
    // =========================================================================

    fn handle_message(&mut self, from: PeerIdentity, message: LockMessage) {
        match message {
            LockMessage::Request { sender } => self.handle_request(sender),
            LockMessage::Grant { target } => self.handle_grant(from, target),
            LockMessage::Deny { target } => self.handle_deny(target),
            LockMessage::Release { sender } => self.handle_release(sender),
        }
    }

    fn handle_request(&mut self, sender: PeerIdentity) {
        match self.state {
            LockState::Available => {
                self.state = LockState::HeldRemotely;
                self.holder = Some(sender);
                self.send_to(sender, &LockMessage::Grant { target: sender });
            }
            LockState::Ours | LockState::HeldRemotely => {
                self.send_to(sender, &LockMessage::Deny { target: sender });
            }
            LockState::Requesting => {
                // Simultaneous request: the smaller identity tuple wins.
                if sender < self.identity {
                    self.state = LockState::HeldRemotely;
                    self.holder = Some(sender);
                    self.send_to(sender, &LockMessage::Grant { target: sender });
                    self.pending.push(LockEvent::Denied);
                } else {
                    if sender == self.identity {
                        warn!(identity = %sender, "identity collision between peers");
                    }
                    self.send_to(sender, &LockMessage::Deny { target: sender });
                }
            }
        }
    }

    fn handle_grant(&mut self, from: PeerIdentity, target: PeerIdentity) {
        if target != self.identity || self.state != LockState::Requesting {
            trace!(%from, "stale grant discarded");
            return;
        }
        if !self.peers.record_grant(from) {
            debug!(%from, "grant from unknown or already-counted peer discarded");
            return;
        }
        // Complete before any queued message is handled, so a request
        // arriving behind the deciding grant is answered from Ours.
        self.try_complete_request();
    }

    fn handle_deny(&mut self, target: PeerIdentity) {
        if target != self.identity || self.state != LockState::Requesting {
            trace!("stale deny discarded");
            return;
        }
        self.state = LockState::Available;
        self.pending.push(LockEvent::Denied);
    }

    fn handle_release(&mut self, sender: PeerIdentity) {
        if self.state == LockState::HeldRemotely && self.holder == Some(sender) {
            self.state = LockState::Available;
            self.holder = None;
            self.pending.push(LockEvent::Released);
        } else {
            debug!(state = %self.state, %sender, "unexpected release discarded");
        }
    }

    fn handle_peer_lost(&mut self, peer: PeerIdentity) {
        let removed = self.peers.remove(peer);
        match self.state {
            LockState::Requesting if removed => {
                // A vanished peer can never answer: synthetic deny.
                self.state = LockState::Available;
                self.pending.push(LockEvent::Denied);
            }
            LockState::HeldRemotely if self.holder == Some(peer) => {
                self.state = LockState::Available;
                self.holder = None;
                self.pending.push(LockEvent::HolderLost(peer));
            }
            _ => {}
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Complete a pending request once every peer has granted. With no
    /// peers the request completes on the first pump.
    fn try_complete_request(&mut self) {
        if self.state == LockState::Requesting && self.peers.all_granted() {
            self.state = LockState::Ours;
            self.pending.push(LockEvent::Granted);
        }
    }

    fn fire_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.pending);
        for event in events {
            self.callbacks.fire(event);
        }
    }

    fn broadcast(&mut self, message: &LockMessage) {
        let frame = format::encode_frame(&self.name, message);
        for peer in self.peers.identities() {
            if !self.transport.send(peer, frame.clone()) {
                debug!(%peer, "send failed, connection down");
            }
        }
    }

    fn send_to(&mut self, peer: PeerIdentity, message: &LockMessage) {
        let frame = format::encode_frame(&self.name, message);
        if !self.transport.send(peer, frame) {
            debug!(%peer, "send failed, connection down");
        }
    }
}

impl<T: Transport> Drop for DistributedMutex<T> {
    /// A held lock is released on teardown so peers are not stranded.
    fn drop(&mut self) {
        if self.state == LockState::Ours {
            self.state = LockState::Available;
            self.broadcast(&LockMessage::Release {
                sender: self.identity,
            });
        }
    }
}
