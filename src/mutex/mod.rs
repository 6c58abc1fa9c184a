pub mod callbacks;
pub mod errors;
pub mod instance;
pub mod message;
pub mod peer;
pub mod transport;


pub use callbacks::{CallbackRegistry, LockEvent};
pub use errors::MutexError;
pub use instance::{DistributedMutex, LockState};
pub use message::LockMessage;
pub use peer::{PeerIdentity, PeerTable};
pub use transport::{ChannelHub, ChannelTransport, Transport, TransportEvent};
