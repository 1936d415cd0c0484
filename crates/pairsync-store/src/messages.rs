use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use pairsync_shared::constants::MAX_CONTENT_SIZE;
use pairsync_shared::{IdentityId, MessageObject, ObjectHash};

use crate::columns;
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Channel, Message};

const MESSAGE_COLUMNS: &str = "hash, channel_id, seq, author, content, timestamp";

impl Database {
    /// Append a message to the end of a channel log.
    ///
    /// The next sequence number is read and written inside one transaction,
    /// so appends to the same channel are strictly ordered.
    pub fn append_message(
        &self,
        channel: &Channel,
        author: &IdentityId,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Message> {
        if content.len() > MAX_CONTENT_SIZE {
            return Err(StoreError::ContentTooLarge {
                size: content.len(),
                max: MAX_CONTENT_SIZE,
            });
        }

        let tx = self.conn().unchecked_transaction()?;

        let head: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM messages WHERE channel_id = ?1",
            params![channel.id.to_string()],
            |row| row.get(0),
        )?;
        let seq = head as u64 + 1;

        let hash = MessageObject::compute_hash(
            &channel.topic,
            &channel.owner,
            seq,
            author,
            &timestamp,
            content,
        );

        let message = Message {
            hash,
            channel_id: channel.id,
            seq,
            author: *author,
            content: content.to_string(),
            timestamp,
        };
        insert_row(&tx, &message, false)?;

        tx.commit()?;
        Ok(message)
    }

    /// Store a message received from a peer. Returns `false` when a message
    /// with the same hash or the same `(channel, seq)` is already stored.
    pub fn insert_message_if_absent(&self, message: &Message) -> Result<bool> {
        insert_row(self.conn(), message, true)
    }

    /// Messages of a channel with `seq > after_seq`, oldest first.
    pub fn get_messages_after(
        &self,
        channel_id: Uuid,
        after_seq: u64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE channel_id = ?1 AND seq > ?2
             ORDER BY seq ASC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![channel_id.to_string(), after_seq as i64, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Every message of a channel, oldest first.
    pub fn get_messages_for_channel(&self, channel_id: Uuid) -> Result<Vec<Message>> {
        self.get_messages_after(channel_id, 0, u32::MAX)
    }

    pub fn get_message_by_hash(&self, hash: &ObjectHash) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE hash = ?1"),
                params![hash.to_hex()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Whether an object with this content address is stored.
    pub fn message_exists(&self, hash: &ObjectHash) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM messages WHERE hash = ?1",
                params![hash.to_hex()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn insert_row(conn: &rusqlite::Connection, message: &Message, ignore_existing: bool) -> Result<bool> {
    let verb = if ignore_existing {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let affected = conn.execute(
        &format!(
            "{verb} INTO messages (hash, channel_id, seq, author, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![
            message.hash.to_hex(),
            message.channel_id.to_string(),
            message.seq as i64,
            message.author.to_hex(),
            message.content,
            message.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(affected > 0)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let seq: i64 = row.get(2)?;
    Ok(Message {
        hash: columns::hash(row, 0)?,
        channel_id: columns::uuid(row, 1)?,
        seq: seq as u64,
        author: columns::identity(row, 3)?,
        content: row.get(4)?,
        timestamp: columns::timestamp(row, 5)?,
    })
}
