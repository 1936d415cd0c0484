//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer or printed as JSON by diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pairsync_shared::{IdentityId, MessageObject, ObjectHash, TopicId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A known identity and the person (main identity) it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRecord {
    pub identity: IdentityId,
    /// Main identity of the owning person. Equal to `identity` for a main id.
    pub person: IdentityId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// One owner's append-only log for a topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Channel {
    /// Local row id. Peers address a channel by `(topic, owner)` instead.
    pub id: Uuid,
    pub topic: TopicId,
    pub owner: IdentityId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message, content-addressed by `hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub hash: ObjectHash,
    pub channel_id: Uuid,
    /// Position in the channel log, starting at 1.
    pub seq: u64,
    pub author: IdentityId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Convert into the form sent to peers.
    pub fn to_object(&self) -> MessageObject {
        MessageObject {
            seq: self.seq,
            author: self.author,
            content: self.content.clone(),
            timestamp: self.timestamp,
            hash: self.hash,
        }
    }

    /// Build a local row for an object received from the channel owner.
    pub fn from_object(channel_id: Uuid, object: &MessageObject) -> Self {
        Self {
            hash: object.hash,
            channel_id,
            seq: object.seq,
            author: object.author,
            content: object.content.clone(),
            timestamp: object.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Access grant
// ---------------------------------------------------------------------------

/// "`grantee` may read channel `channel_id`".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessGrant {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub grantee: IdentityId,
    pub created_at: DateTime<Utc>,
}
