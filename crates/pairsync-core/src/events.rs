use pairsync_shared::{IdentityId, TopicId};
use pairsync_store::Channel;

/// Published by the [`AccessGrantManager`](crate::AccessGrantManager).
#[derive(Debug, Clone)]
pub enum GrantEvent {
    Created { channel: Channel, grantee: IdentityId },
    Failed {
        channel: Channel,
        grantee: IdentityId,
        reason: String,
    },
}

/// Passed to `on_topic_updated` observers when a topic gains messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicUpdate {
    pub topic: TopicId,
    /// Owner of the channel that changed
    pub owner: IdentityId,
    pub new_messages: usize,
    /// Head sequence of that channel after the update
    pub head_seq: u64,
}
