//! Topics, their participant sets and the per-owner channel logs.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use pairsync_shared::{IdentityId, MessageObject, ObjectHash, TopicId};
use pairsync_store::{Channel, Message, StoreError};

use crate::error::{Result, SyncError};
use crate::SharedDatabase;

pub struct ChannelDirectory {
    db: SharedDatabase,
}

impl ChannelDirectory {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Derive the id of the topic between `participants`. Order and
    /// duplicates do not matter.
    pub fn topic_id_for<'a, I>(participants: I) -> Result<TopicId>
    where
        I: IntoIterator<Item = &'a IdentityId>,
    {
        Ok(TopicId::for_participants(participants)?)
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Persist a topic for `participants` and return its id.
    ///
    /// Fails with [`SyncError::TopicIdCollision`] when a topic with the same
    /// id is stored with a different participant set.
    pub async fn register_topic(&self, participants: &BTreeSet<IdentityId>) -> Result<TopicId> {
        let topic = Self::topic_id_for(participants)?;

        let db = self.db.lock().await;
        if db.insert_topic(&topic, participants)? {
            debug!(topic = %topic.short(), "Topic registered");
            return Ok(topic);
        }

        let stored = db
            .topic_participants(&topic)?
            .ok_or_else(|| SyncError::UnknownTopic(topic.clone()))?;
        if stored != *participants {
            error!(
                topic = %topic,
                stored = stored.len(),
                requested = participants.len(),
                "Topic id collision: stored participant set differs"
            );
            return Err(SyncError::TopicIdCollision {
                topic,
                stored,
                requested: participants.clone(),
            });
        }

        Ok(topic)
    }

    /// Make sure a topic known only by id is stored, returning its
    /// participants.
    pub async fn ensure_topic(&self, topic: &TopicId) -> Result<BTreeSet<IdentityId>> {
        let participants = topic.participants();
        self.register_topic(&participants).await?;
        Ok(participants)
    }

    /// Participants of a stored topic.
    pub async fn participants(&self, topic: &TopicId) -> Result<BTreeSet<IdentityId>> {
        self.db
            .lock()
            .await
            .topic_participants(topic)?
            .ok_or_else(|| SyncError::UnknownTopic(topic.clone()))
    }

    pub async fn list_topics(&self) -> Result<Vec<TopicId>> {
        Ok(self.db.lock().await.list_topics()?)
    }

    /// Every stored topic `identity` takes part in.
    pub async fn topics_containing(&self, identity: &IdentityId) -> Result<Vec<TopicId>> {
        Ok(self.db.lock().await.topics_containing(identity)?)
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Return the channel of `owner` in `topic`, creating it (and the topic)
    /// if needed. The owner must be a participant.
    pub async fn ensure_channel(&self, topic: &TopicId, owner: &IdentityId) -> Result<Channel> {
        let participants = self.ensure_topic(topic).await?;
        if !participants.contains(owner) {
            warn!(topic = %topic.short(), owner = %owner.short(), "Channel owner is not a participant");
            return Err(SyncError::NotAParticipant {
                identity: *owner,
                topic: topic.clone(),
            });
        }

        let (channel, created) = self.db.lock().await.ensure_channel(topic, owner)?;
        if created {
            debug!(
                topic = %topic.short(),
                owner = %owner.short(),
                channel = %channel.id,
                "Channel created"
            );
        }
        Ok(channel)
    }

    pub async fn find_channel(&self, topic: &TopicId, owner: &IdentityId) -> Result<Option<Channel>> {
        Ok(self.db.lock().await.find_channel(topic, owner)?)
    }

    pub async fn get_channel(&self, id: Uuid) -> Result<Channel> {
        Ok(self.db.lock().await.get_channel(id)?)
    }

    /// Every stored channel of `topic`, one per owner.
    pub async fn list_channel_instances(&self, topic: &TopicId) -> Result<Vec<Channel>> {
        Ok(self.db.lock().await.list_channels_for_topic(topic)?)
    }

    pub async fn channels_owned_by(&self, owner: &IdentityId) -> Result<Vec<Channel>> {
        Ok(self.db.lock().await.list_channels_owned_by(owner)?)
    }

    // ------------------------------------------------------------------
    // Channel logs
    // ------------------------------------------------------------------

    /// Append `content` authored by `author` at the end of the channel log.
    pub async fn append_message(
        &self,
        channel: &Channel,
        author: &IdentityId,
        content: &str,
    ) -> Result<Message> {
        let message = self
            .db
            .lock()
            .await
            .append_message(channel, author, content, Utc::now())?;

        debug!(
            topic = %channel.topic.short(),
            seq = message.seq,
            hash = %message.hash,
            "Message appended"
        );
        Ok(message)
    }

    /// Highest sequence number stored for a channel, 0 when empty.
    pub async fn channel_head(&self, channel_id: Uuid) -> Result<u64> {
        Ok(self.db.lock().await.channel_head(channel_id)?)
    }

    pub async fn messages_after(
        &self,
        channel_id: Uuid,
        after_seq: u64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        Ok(self
            .db
            .lock()
            .await
            .get_messages_after(channel_id, after_seq, limit)?)
    }

    /// Look up a stored message by content address.
    pub async fn message(&self, hash: &ObjectHash) -> Result<Option<Message>> {
        match self.db.lock().await.get_message_by_hash(hash) {
            Ok(message) => Ok(Some(message)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn messages_for(&self, channel_id: Uuid) -> Result<Vec<Message>> {
        Ok(self.db.lock().await.get_messages_for_channel(channel_id)?)
    }

    /// Store objects received for a remote channel. Objects whose hash does
    /// not match their content are skipped. Returns how many were new.
    pub async fn store_remote_messages(
        &self,
        channel: &Channel,
        objects: &[MessageObject],
    ) -> Result<usize> {
        let db = self.db.lock().await;
        let mut stored = 0;
        for object in objects {
            if db.message_exists(&object.hash)? {
                continue;
            }
            if !object.verify(&channel.topic, &channel.owner) {
                warn!(
                    topic = %channel.topic.short(),
                    owner = %channel.owner.short(),
                    seq = object.seq,
                    "Dropping object with mismatched hash"
                );
                continue;
            }
            if db.insert_message_if_absent(&Message::from_object(channel.id, object))? {
                stored += 1;
            }
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use pairsync_store::Database;

    use super::*;
    use crate::share;

    fn ids() -> (IdentityId, IdentityId, IdentityId) {
        (IdentityId([1u8; 32]), IdentityId([2u8; 32]), IdentityId([3u8; 32]))
    }

    #[test]
    fn test_topic_id_is_permutation_invariant() {
        let (a, b, c) = ids();
        let forward = ChannelDirectory::topic_id_for(&[a, b, c]).unwrap();
        let backward = ChannelDirectory::topic_id_for(&[c, b, a]).unwrap();
        let shuffled = ChannelDirectory::topic_id_for(&[b, a, c, a]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);

        assert!(ChannelDirectory::topic_id_for(&[a, a]).is_err());
    }

    #[tokio::test]
    async fn test_ensure_channel_is_idempotent() {
        let (a, b, c) = ids();
        let directory = ChannelDirectory::new(share(Database::open_in_memory().unwrap()));
        let topic = ChannelDirectory::topic_id_for(&[a, b]).unwrap();

        let first = directory.ensure_channel(&topic, &a).await.unwrap();
        let second = directory.ensure_channel(&topic, &a).await.unwrap();
        assert_eq!(first, second);
        directory.ensure_channel(&topic, &b).await.unwrap();
        assert_eq!(directory.list_channel_instances(&topic).await.unwrap().len(), 2);

        assert!(matches!(
            directory.ensure_channel(&topic, &c).await,
            Err(SyncError::NotAParticipant { .. })
        ));
        assert_eq!(
            directory.participants(&topic).await.unwrap(),
            [a, b].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn test_register_topic_detects_collision() {
        let (a, b, c) = ids();
        let db = share(Database::open_in_memory().unwrap());
        let participants: BTreeSet<_> = [a, b].into_iter().collect();
        let topic = TopicId::for_participants(&participants).unwrap();

        let corrupt: BTreeSet<_> = [a, c].into_iter().collect();
        db.lock().await.insert_topic(&topic, &corrupt).unwrap();

        let directory = ChannelDirectory::new(db);
        assert!(matches!(
            directory.register_topic(&participants).await,
            Err(SyncError::TopicIdCollision { .. })
        ));
    }

    #[tokio::test]
    async fn test_remote_messages_are_deduplicated_and_verified() {
        let (a, b, _) = ids();
        let remote = ChannelDirectory::new(share(Database::open_in_memory().unwrap()));
        let local = ChannelDirectory::new(share(Database::open_in_memory().unwrap()));
        let topic = ChannelDirectory::topic_id_for(&[a, b]).unwrap();

        let source = remote.ensure_channel(&topic, &a).await.unwrap();
        remote.append_message(&source, &a, "one").await.unwrap();
        remote.append_message(&source, &a, "two").await.unwrap();
        let mut objects: Vec<MessageObject> = remote
            .messages_for(source.id)
            .await
            .unwrap()
            .iter()
            .map(Message::to_object)
            .collect();

        let mirror = local.ensure_channel(&topic, &a).await.unwrap();
        assert_eq!(local.store_remote_messages(&mirror, &objects).await.unwrap(), 2);
        assert_eq!(local.store_remote_messages(&mirror, &objects).await.unwrap(), 0);
        assert_eq!(local.channel_head(mirror.id).await.unwrap(), 2);
        let first = local.message(&objects[0].hash).await.unwrap().unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(first.channel_id, mirror.id);

        objects[0].seq = 3;
        objects[0].content = "tampered".to_string();
        objects[0].hash = ObjectHash([9u8; 32]);
        assert_eq!(local.store_remote_messages(&mirror, &objects[..1]).await.unwrap(), 0);
        assert_eq!(local.channel_head(mirror.id).await.unwrap(), 2);
    }
}
