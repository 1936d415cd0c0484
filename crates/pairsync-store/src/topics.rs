//! Topic records and their participant sets.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use pairsync_shared::{IdentityId, TopicId};

use crate::columns;
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Persist a topic and its participants. Returns `false` if the topic
    /// already existed, in which case nothing is written.
    pub fn insert_topic(&self, topic: &TopicId, participants: &BTreeSet<IdentityId>) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO topics (id, created_at) VALUES (?1, ?2)",
            params![topic.as_str(), Utc::now().to_rfc3339()],
        )?;

        if inserted > 0 {
            for participant in participants {
                tx.execute(
                    "INSERT INTO topic_participants (topic_id, identity) VALUES (?1, ?2)",
                    params![topic.as_str(), participant.to_hex()],
                )?;
            }
        }

        tx.commit()?;
        Ok(inserted > 0)
    }

    /// Stored participant set of a topic, or `None` for an unknown topic.
    pub fn topic_participants(&self, topic: &TopicId) -> Result<Option<BTreeSet<IdentityId>>> {
        let known = self
            .conn()
            .query_row(
                "SELECT 1 FROM topics WHERE id = ?1",
                params![topic.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        if known.is_none() {
            return Ok(None);
        }

        let mut stmt = self.conn().prepare(
            "SELECT identity FROM topic_participants WHERE topic_id = ?1 ORDER BY identity ASC",
        )?;
        let rows = stmt.query_map(params![topic.as_str()], |row| columns::identity(row, 0))?;

        let mut participants = BTreeSet::new();
        for row in rows {
            participants.insert(row?);
        }
        Ok(Some(participants))
    }

    /// List every known topic, oldest first.
    pub fn list_topics(&self) -> Result<Vec<TopicId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM topics ORDER BY created_at ASC, id ASC")?;
        let rows = stmt.query_map([], |row| columns::topic(row, 0))?;

        let mut topics = Vec::new();
        for row in rows {
            topics.push(row?);
        }
        Ok(topics)
    }

    /// Topics whose participant set contains `identity`.
    pub fn topics_containing(&self, identity: &IdentityId) -> Result<Vec<TopicId>> {
        let mut stmt = self.conn().prepare(
            "SELECT topic_id FROM topic_participants WHERE identity = ?1 ORDER BY topic_id ASC",
        )?;
        let rows = stmt.query_map(params![identity.to_hex()], |row| columns::topic(row, 0))?;

        let mut topics = Vec::new();
        for row in rows {
            topics.push(row?);
        }
        Ok(topics)
    }
}
