//! Owner-scoped [`Channel`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use pairsync_shared::{IdentityId, TopicId};

use crate::columns;
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::Channel;

const CHANNEL_COLUMNS: &str = "id, topic_id, owner, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the channel for `(topic, owner)`, creating an empty one if it
    /// does not exist yet. The boolean is `true` when a row was created.
    ///
    /// The topic must already be stored.
    pub fn ensure_channel(&self, topic: &TopicId, owner: &IdentityId) -> Result<(Channel, bool)> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO channels (id, topic_id, owner, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                topic.as_str(),
                owner.to_hex(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        let channel = self.find_channel(topic, owner)?.ok_or(crate::StoreError::NotFound)?;
        Ok((channel, inserted > 0))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single channel by its local id.
    pub fn get_channel(&self, id: Uuid) -> Result<Channel> {
        self.conn()
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                params![id.to_string()],
                row_to_channel,
            )
            .map_err(not_found)
    }

    /// Look up the channel for `(topic, owner)`.
    pub fn find_channel(&self, topic: &TopicId, owner: &IdentityId) -> Result<Option<Channel>> {
        let channel = self
            .conn()
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE topic_id = ?1 AND owner = ?2"),
                params![topic.as_str(), owner.to_hex()],
                row_to_channel,
            )
            .optional()?;
        Ok(channel)
    }

    /// All channel instances of a topic, ordered by owner.
    pub fn list_channels_for_topic(&self, topic: &TopicId) -> Result<Vec<Channel>> {
        self.query_channels(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE topic_id = ?1 ORDER BY owner ASC"),
            topic.as_str(),
        )
    }

    /// Channels owned by `owner`, ordered by topic.
    pub fn list_channels_owned_by(&self, owner: &IdentityId) -> Result<Vec<Channel>> {
        self.query_channels(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE owner = ?1 ORDER BY topic_id ASC"),
            &owner.to_hex(),
        )
    }

    /// Highest sequence number in a channel, 0 when it is empty.
    pub fn channel_head(&self, channel_id: Uuid) -> Result<u64> {
        let head: i64 = self.conn().query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE channel_id = ?1",
            params![channel_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(head as u64)
    }

    fn query_channels(&self, sql: &str, key: &str) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![key], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Channel`].
pub(crate) fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: columns::uuid(row, 0)?,
        topic: columns::topic(row, 1)?,
        owner: columns::identity(row, 2)?,
        created_at: columns::timestamp(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn setup() -> (Database, TopicId, IdentityId, IdentityId) {
        let db = Database::open_in_memory().unwrap();
        let a = IdentityId([1u8; 32]);
        let b = IdentityId([2u8; 32]);
        let participants: BTreeSet<_> = [a, b].into_iter().collect();
        let topic = TopicId::for_participants(&participants).unwrap();
        db.insert_topic(&topic, &participants).unwrap();
        (db, topic, a, b)
    }

    #[test]
    fn ensure_channel_is_idempotent() {
        let (db, topic, a, _) = setup();

        let (first, created) = db.ensure_channel(&topic, &a).unwrap();
        assert!(created);
        let (second, created) = db.ensure_channel(&topic, &a).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(db.get_channel(first.id).unwrap(), first);
    }

    #[test]
    fn one_channel_per_owner() {
        let (db, topic, a, b) = setup();

        let (mine, _) = db.ensure_channel(&topic, &a).unwrap();
        let (theirs, _) = db.ensure_channel(&topic, &b).unwrap();
        assert_ne!(mine.id, theirs.id);

        let all = db.list_channels_for_topic(&topic).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(db.list_channels_owned_by(&a).unwrap(), vec![mine]);
    }

    #[test]
    fn channel_for_unknown_topic_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let a = IdentityId([1u8; 32]);
        let topic = TopicId::for_participants([&a, &IdentityId([3u8; 32])]).unwrap();
        assert!(db.ensure_channel(&topic, &a).is_err());
    }

    #[test]
    fn empty_channel_head_is_zero() {
        let (db, topic, a, _) = setup();
        let (channel, _) = db.ensure_channel(&topic, &a).unwrap();
        assert_eq!(db.channel_head(channel.id).unwrap(), 0);
        assert!(matches!(db.get_channel(Uuid::new_v4()), Err(crate::StoreError::NotFound)));
    }
}
