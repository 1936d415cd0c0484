//! The local identity secret and the identity → person map.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use pairsync_shared::IdentityId;

use crate::columns;
use crate::database::Database;
use crate::error::Result;
use crate::models::IdentityRecord;

impl Database {
    /// Persist the hex-encoded secret of the local main identity.
    pub fn save_local_identity(&self, secret_hex: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO local_identity (id, secret_key, created_at) VALUES (1, ?1, ?2)",
            params![secret_hex, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Hex-encoded secret of the local main identity, if one was saved.
    pub fn load_local_identity(&self) -> Result<Option<String>> {
        let secret = self
            .conn()
            .query_row(
                "SELECT secret_key FROM local_identity WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(secret)
    }

    /// Bind `identity` to `person` unless it is already bound. Returns the
    /// record as stored, which may name a different person.
    pub fn upsert_identity(&self, identity: &IdentityId, person: &IdentityId) -> Result<IdentityRecord> {
        self.conn().execute(
            "INSERT OR IGNORE INTO identities (identity, person, created_at) VALUES (?1, ?2, ?3)",
            params![identity.to_hex(), person.to_hex(), Utc::now().to_rfc3339()],
        )?;

        let record = self.conn().query_row(
            "SELECT identity, person, created_at FROM identities WHERE identity = ?1",
            params![identity.to_hex()],
            row_to_identity,
        )?;
        Ok(record)
    }

    /// The person an identity belongs to, if known.
    pub fn person_of(&self, identity: &IdentityId) -> Result<Option<IdentityId>> {
        let person = self
            .conn()
            .query_row(
                "SELECT person FROM identities WHERE identity = ?1",
                params![identity.to_hex()],
                |row| columns::identity(row, 0),
            )
            .optional()?;
        Ok(person)
    }

    /// Every identity bound to `person`.
    pub fn identities_of(&self, person: &IdentityId) -> Result<Vec<IdentityRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT identity, person, created_at
             FROM identities
             WHERE person = ?1
             ORDER BY identity ASC",
        )?;
        let rows = stmt.query_map(params![person.to_hex()], row_to_identity)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRecord> {
    Ok(IdentityRecord {
        identity: columns::identity(row, 0)?,
        person: columns::identity(row, 1)?,
        created_at: columns::timestamp(row, 2)?,
    })
}
