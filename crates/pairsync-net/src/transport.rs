use async_trait::async_trait;

use crate::connections::Connection;
use crate::error::NetError;

/// The send half of a peer-to-peer transport.
///
/// Implementations deliver an opaque payload to the remote end of a live
/// connection. Lifecycle changes are reported separately through the
/// [`ConnectionRegistry`](crate::ConnectionRegistry).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, connection: &Connection, payload: Vec<u8>) -> Result<(), NetError>;
}
