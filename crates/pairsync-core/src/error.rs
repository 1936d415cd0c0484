use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use pairsync_net::NetError;
use pairsync_shared::{IdentityError, IdentityId, ProtocolError, TopicError, TopicId};
use pairsync_store::StoreError;

/// Errors surfaced by the sync subsystem.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local identity has not been bootstrapped yet. Retry afterwards.
    #[error("Not ready: {0}")]
    NotReady(&'static str),

    /// A grant could not be written. It is queued and retried on the next
    /// connection event.
    #[error("Failed to persist access grant for {grantee} on {topic} (channel {channel}): {reason}")]
    GrantPersistence {
        channel: Uuid,
        topic: TopicId,
        grantee: IdentityId,
        reason: String,
    },

    /// Surfaced to the UI as "peer unreachable".
    #[error("Peer unreachable: connection to {remote} timed out after {waited:?}")]
    ConnectionTimeout { remote: IdentityId, waited: Duration },

    /// A stored topic with this id has a different participant set. Ids are
    /// derived from the set, so this means upstream corruption.
    #[error("Topic id collision on {topic}: stored {stored:?}, requested {requested:?}")]
    TopicIdCollision {
        topic: TopicId,
        stored: BTreeSet<IdentityId>,
        requested: BTreeSet<IdentityId>,
    },

    #[error("{identity} is not a participant of {topic}")]
    NotAParticipant { identity: IdentityId, topic: TopicId },

    #[error("Only {owner} may append to its channel in {topic}")]
    NotChannelOwner { owner: IdentityId, topic: TopicId },

    #[error("Unknown topic: {0}")]
    UnknownTopic(TopicId),

    #[error("{requester} may not read the channel of {owner} in {topic}")]
    AccessDenied {
        requester: IdentityId,
        owner: IdentityId,
        topic: TopicId,
    },

    #[error("Identity {identity} already belongs to {person}")]
    IdentityConflict {
        identity: IdentityId,
        person: IdentityId,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Net(NetError),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl From<NetError> for SyncError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::ConnectionTimeout { remote, waited } => {
                SyncError::ConnectionTimeout { remote, waited }
            }
            other => SyncError::Net(other),
        }
    }
}

impl SyncError {
    /// Whether retrying later can succeed without any upstream fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotReady(_)
                | SyncError::GrantPersistence { .. }
                | SyncError::ConnectionTimeout { .. }
                | SyncError::Net(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
