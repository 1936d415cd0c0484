//! Persisted [`AccessGrant`] records.
//!
//! A grant is unique per `(channel, grantee)`, so inserting an existing grant
//! is a no-op rather than an error. Grants are never deleted.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use pairsync_shared::IdentityId;

use crate::channels::row_to_channel;
use crate::columns;
use crate::database::Database;
use crate::error::Result;
use crate::models::{AccessGrant, Channel};

impl Database {
    /// Persist a grant. Returns `true` if a new record was written, `false`
    /// if the grant already existed.
    pub fn insert_grant(&self, channel_id: Uuid, grantee: &IdentityId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO access_grants (id, channel_id, grantee, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                channel_id.to_string(),
                grantee.to_hex(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn has_grant(&self, channel_id: Uuid, grantee: &IdentityId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM access_grants WHERE channel_id = ?1 AND grantee = ?2",
                params![channel_id.to_string(), grantee.to_hex()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Grants issued for one channel, oldest first.
    pub fn list_grants_for_channel(&self, channel_id: Uuid) -> Result<Vec<AccessGrant>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, channel_id, grantee, created_at
             FROM access_grants
             WHERE channel_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![channel_id.to_string()], row_to_grant)?;

        let mut grants = Vec::new();
        for row in rows {
            grants.push(row?);
        }
        Ok(grants)
    }

    /// Reverse lookup: every channel `grantee` holds a grant for.
    pub fn channels_accessible_to(&self, grantee: &IdentityId) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.topic_id, c.owner, c.created_at
             FROM access_grants g
             JOIN channels c ON c.id = g.channel_id
             WHERE g.grantee = ?1
             ORDER BY c.topic_id ASC, c.owner ASC",
        )?;

        let rows = stmt.query_map(params![grantee.to_hex()], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }
}

fn row_to_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessGrant> {
    Ok(AccessGrant {
        id: columns::uuid(row, 0)?,
        channel_id: columns::uuid(row, 1)?,
        grantee: columns::identity(row, 2)?,
        created_at: columns::timestamp(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pairsync_shared::TopicId;

    use super::*;

    #[test]
    fn grant_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = IdentityId([1u8; 32]);
        let b = IdentityId([2u8; 32]);
        let participants: BTreeSet<_> = [a, b].into_iter().collect();
        let topic = TopicId::for_participants(&participants).unwrap();
        db.insert_topic(&topic, &participants).unwrap();
        let (channel, _) = db.ensure_channel(&topic, &a).unwrap();

        assert!(!db.has_grant(channel.id, &b).unwrap());
        assert!(db.insert_grant(channel.id, &b).unwrap());
        assert!(!db.insert_grant(channel.id, &b).unwrap());
        assert!(!db.insert_grant(channel.id, &b).unwrap());

        assert!(db.has_grant(channel.id, &b).unwrap());
        assert_eq!(db.list_grants_for_channel(channel.id).unwrap().len(), 1);
        assert_eq!(db.channels_accessible_to(&b).unwrap(), vec![channel]);
        assert!(db.channels_accessible_to(&a).unwrap().is_empty());
    }
}
