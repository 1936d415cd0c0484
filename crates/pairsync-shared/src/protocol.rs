use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{KDF_CONTEXT_MESSAGE_HASH, MAX_PAYLOAD_SIZE};
use crate::error::ProtocolError;
use crate::types::{IdentityId, ObjectHash, TopicId};

/// All sync messages exchanged between peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Channels the sender has made readable to the receiver, with their
    /// current head sequence number
    Announce { heads: Vec<ChannelHead> },

    /// Ask the channel owner for messages after a cursor
    PullRequest { wants: Vec<PullCursor> },

    /// One page of messages from a single channel
    Objects(ObjectsPage),

    /// A pull was refused (no grant, unknown channel)
    Refused {
        topic: TopicId,
        owner: IdentityId,
        reason: String,
    },
}

/// Head of one owner-scoped channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHead {
    pub topic: TopicId,
    pub owner: IdentityId,
    /// Highest sequence number in the channel (0 when empty)
    pub head_seq: u64,
}

/// Where a pull should resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCursor {
    pub topic: TopicId,
    pub owner: IdentityId,
    /// Return messages with a sequence number strictly greater than this
    pub after_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectsPage {
    pub topic: TopicId,
    pub owner: IdentityId,
    pub messages: Vec<MessageObject>,
    /// More messages remain after the last one in this page
    pub more: bool,
}

/// A message as it travels between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageObject {
    pub seq: u64,
    pub author: IdentityId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Content address, see [`MessageObject::compute_hash`]
    pub hash: ObjectHash,
}

impl MessageObject {
    /// BLAKE3 content address over everything that identifies a message.
    pub fn compute_hash(
        topic: &TopicId,
        owner: &IdentityId,
        seq: u64,
        author: &IdentityId,
        timestamp: &DateTime<Utc>,
        content: &str,
    ) -> ObjectHash {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_MESSAGE_HASH);
        hasher.update(topic.as_str().as_bytes());
        hasher.update(&owner.0);
        hasher.update(&seq.to_be_bytes());
        hasher.update(&author.0);
        hasher.update(timestamp.to_rfc3339().as_bytes());
        hasher.update(content.as_bytes());
        ObjectHash(*hasher.finalize().as_bytes())
    }

    /// Size of this object once encoded on the wire.
    pub fn encoded_len(&self) -> Result<usize, ProtocolError> {
        bincode::serialized_size(self)
            .map(|size| size as usize)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Whether the carried hash matches the message body.
    pub fn verify(&self, topic: &TopicId, owner: &IdentityId) -> bool {
        let expected = Self::compute_hash(
            topic,
            owner,
            self.seq,
            &self.author,
            &self.timestamp,
            &self.content,
        );
        expected == self.hash
    }
}

impl SyncMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = bincode::serialize(self).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        bincode::deserialize(data).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Announce { .. } => "announce",
            SyncMessage::PullRequest { .. } => "pull-request",
            SyncMessage::Objects(_) => "objects",
            SyncMessage::Refused { .. } => "refused",
        }
    }
}
