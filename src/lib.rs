//! Distributed mutual exclusion over a message-typed transport.
//!
//! Every participating process owns a [`DistributedMutex`] instance with the
//! same name. Any instance may call [`DistributedMutex::request`]; at most
//! one instance holds the lock at any time, and every instance learns when
//! the holder releases it. The resource governed by the lock is external;
//! this crate implements only the coordination protocol.
//!
//! The protocol is four messages (`Request`, `Grant`, `Deny`, `Release`)
//! exchanged pairwise between all peers. A request is granted once every
//! peer has answered `Grant`; simultaneous requests are resolved
//! deterministically by comparing the requesters' `(ip, port)` identity
//! tuples, smaller tuple winning.
//!
//! Instances are single-threaded and non-blocking: the host calls
//! [`DistributedMutex::pump`] periodically to drain inbound traffic and fire
//! user callbacks. The transport is an injected capability (see
//! [`mutex::transport::Transport`]); an in-process channel implementation is
//! provided for wiring instances together within one process and for tests.

pub mod chaos;
pub mod mutex;
pub mod wire;

pub use mutex::callbacks::LockEvent;
pub use mutex::errors::MutexError;
pub use mutex::instance::{DistributedMutex, LockState};
pub use mutex::message::LockMessage;
pub use mutex::peer::{PeerIdentity, PeerTable};
pub use mutex::transport::{ChannelHub, ChannelTransport, Transport, TransportEvent};
pub use wire::errors::DecodeError;
