use std::time::Duration;

use thiserror::Error;

use pairsync_shared::IdentityId;

use crate::connections::{ConnectionId, ConnectionState};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Illegal connection transition {from:?} -> {to:?} on {id}")]
    InvalidTransition {
        id: ConnectionId,
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Connection to {remote} timed out after {waited:?}")]
    ConnectionTimeout { remote: IdentityId, waited: Duration },

    #[error("Connection {0} is not connected")]
    NotConnected(ConnectionId),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(IdentityId),
}
