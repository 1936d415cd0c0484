// Connection tracking and the transport seam used by the sync coordinator.
// The real peer-to-peer transport lives outside this workspace; it plugs in
// by implementing `Transport` and reporting lifecycle changes to the
// `ConnectionRegistry`.

pub mod backoff;
pub mod connections;
pub mod error;
pub mod memory;
pub mod observers;
pub mod transport;

pub use backoff::Backoff;
pub use connections::{
    CloseReason, Connection, ConnectionId, ConnectionRegistry, ConnectionState, PeerHistory,
};
pub use error::NetError;
pub use memory::{Envelope, MemoryNetwork, MemoryTransport};
pub use observers::{ObserverList, Subscription};
pub use transport::Transport;
