//! User callback registry.
//!
//! Hooks fire only inside `pump`, after message processing has finished, so
//! user code never observes a half-finished transition and has a single
//! well-defined reentrancy point. Within a list, hooks fire in registration
//! order. A hook must not drive the same instance reentrantly; ownership
//! makes that impossible to express without interior mutability, which is
//! the point.

use serde::{Deserialize, Serialize};

use super::peer::PeerIdentity;

/// Events delivered to user hooks at the end of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockEvent {
    /// Our request was granted by every peer; the lock is ours.
    Granted,

    /// Our request failed: refused locally, denied by a peer, pre-empted by
    /// a tiebreak loss, cancelled, or abandoned after a peer vanished.
    Denied,

    /// The lock was released, by us or by the remote holder.
    Released,

    /// The remote holder's connection vanished while it held the lock. The
    /// lock is lost from our point of view; this is not a release.
    HolderLost(PeerIdentity),
}

type Hook = Box<dyn FnMut()>;
type HolderLostHook = Box<dyn FnMut(PeerIdentity)>;

/// Ordered per-event lists of user hooks.
#[derive(Default)]
pub struct CallbackRegistry {
    granted: Vec<Hook>,
    denied: Vec<Hook>,
    released: Vec<Hook>,
    holder_lost: Vec<HolderLostHook>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry::default()
    }

    pub fn add_granted(&mut self, hook: impl FnMut() + 'static) {
        self.granted.push(Box::new(hook));
    }

    pub fn add_denied(&mut self, hook: impl FnMut() + 'static) {
        self.denied.push(Box::new(hook));
    }

    pub fn add_released(&mut self, hook: impl FnMut() + 'static) {
        self.released.push(Box::new(hook));
    }

    pub fn add_holder_lost(&mut self, hook: impl FnMut(PeerIdentity) + 'static) {
        self.holder_lost.push(Box::new(hook));
    }

    /// Fire every hook registered for `event`, in registration order.
    pub fn fire(&mut self, event: LockEvent) {
        match event {
            LockEvent::Granted => {
                for hook in &mut self.granted {
                    hook();
                }
            }
            LockEvent::Denied => {
                for hook in &mut self.denied {
                    hook();
                }
            }
            LockEvent::Released => {
                for hook in &mut self.released {
                    hook();
                }
            }
            LockEvent::HolderLost(peer) => {
                for hook in &mut self.holder_lost {
                    hook(peer);
                }
            }
        }
    }
}
