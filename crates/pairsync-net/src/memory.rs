//! In-process transport.
//!
//! Every endpoint owns an mpsc inbox; sending on a connection pushes an
//! [`Envelope`] into the remote identity's inbox. Used by tests and by the
//! node binary when no external transport is attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use pairsync_shared::IdentityId;

use crate::connections::Connection;
use crate::error::NetError;
use crate::transport::Transport;

const INBOX_CAPACITY: usize = 256;

/// A payload as received by an endpoint.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: IdentityId,
    pub payload: Vec<u8>,
}

/// Shared routing table of all in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<IdentityId, mpsc::Sender<Envelope>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `local` on the network, replacing any earlier endpoint.
    pub fn endpoint(&self, local: IdentityId) -> (MemoryTransport, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local, tx);

        debug!(peer = %local.short(), "Memory endpoint registered");

        let transport = MemoryTransport {
            local,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Take `identity` off the network. Later sends to it fail.
    pub fn remove(&self, identity: &IdentityId) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }

    fn sender_for(&self, identity: &IdentityId) -> Option<mpsc::Sender<Envelope>> {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }
}

/// Sending side of one endpoint on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    local: IdentityId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn local(&self) -> IdentityId {
        self.local
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, connection: &Connection, payload: Vec<u8>) -> Result<(), NetError> {
        if !connection.is_connected() {
            return Err(NetError::NotConnected(connection.id));
        }

        let sender = self
            .network
            .sender_for(&connection.remote)
            .ok_or(NetError::PeerUnreachable(connection.remote))?;

        debug!(
            from = %self.local.short(),
            to = %connection.remote.short(),
            len = payload.len(),
            "Memory transport send"
        );

        sender
            .send(Envelope {
                from: self.local,
                payload,
            })
            .await
            .map_err(|_| NetError::PeerUnreachable(connection.remote))
    }
}
